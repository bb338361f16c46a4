// Keyboard teleop: WASD move, Z/X rotate, R/F speed, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use rm_chassis_runtime::config::TOPIC_CMD_BASE;
use rm_chassis_runtime::messages::BaseCommand;
use std::time::{Duration, Instant};
use tracing::info;

const SPEEDS: [f32; 3] = [0.3, 1.0, 2.5]; // m/s
const TURN_SPEEDS: [f32; 3] = [30.0, 90.0, 180.0]; // deg/s
const INPUT_TIMEOUT: Duration = Duration::from_millis(100); // Stop after this long with no input

const STOP: BaseCommand = BaseCommand {
    vx: 0.0,
    vy: 0.0,
    wz: 0.0,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_BASE).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, Q=quit");
    print_speed(0);

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut cmd = STOP;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let speed = SPEEDS[speed_idx];
                let turn = TURN_SPEEDS[speed_idx].to_radians();

                match code {
                    KeyCode::Char('w') if pressed => cmd.vx = speed,
                    KeyCode::Char('s') if pressed => cmd.vx = -speed,
                    KeyCode::Char('a') if pressed => cmd.vy = speed,
                    KeyCode::Char('d') if pressed => cmd.vy = -speed,
                    KeyCode::Char('z') if pressed => cmd.wz = turn,
                    KeyCode::Char('x') if pressed => cmd.wz = -turn,

                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }

                if pressed && matches!(code, KeyCode::Char('w' | 's' | 'a' | 'd' | 'z' | 'x')) {
                    last_movement_input = Instant::now();
                }
            }
        }

        if last_movement_input.elapsed() > INPUT_TIMEOUT {
            cmd = STOP;
        }

        // Always publish so the runtime watchdog stays fed
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    // Leave the chassis stopped
    publisher.put(serde_json::to_string(&STOP)?).await?;
    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {} ({} m/s)", label, SPEEDS[idx]);
}
