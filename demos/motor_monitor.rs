// Motor monitor: READ-ONLY view of DJI motor feedback on the bus
//
// Attaches the configured motors without commanding them and prints their
// feedback twice a second. Use it to check wiring and ids before running
// the runtime.
//
// Usage: cargo run --example motor_monitor -- --transport slcan --interface /dev/ttyACM0
//        cargo run --example motor_monitor -- --chassis steering

use clap::Parser;
use rm_chassis_runtime::config::{RuntimeConfig, WHEEL_COUNT};
use rm_chassis_runtime::motor::{DjiMotor, MotorBus};
use rm_chassis_runtime::runtime::open_transport;
use std::thread::sleep;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const REFRESH: Duration = Duration::from_millis(500);

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = RuntimeConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!(
        "DJI motor monitor (READ-ONLY), {:?} on {}",
        config.transport, config.interface
    );
    let bus = MotorBus::new(open_transport(&config)?);

    // DjiMotor never transmits until commanded, unlike MotorSet which zeroes
    // its motors on drop
    let mut motors = (1..=WHEEL_COUNT as u8)
        .map(|id| DjiMotor::new(&bus, config.drive_family, id))
        .collect::<Result<Vec<_>, _>>()?;
    if config.drivetrain()?.is_steering() {
        for id in 1..=WHEEL_COUNT as u8 {
            motors.push(DjiMotor::new(&bus, config.steer_family, id)?);
        }
    }
    let _listener = bus.spawn_listener()?;

    for motor in &motors {
        println!(
            "  {:?} id {}: feedback 0x{:03X}, control 0x{:03X}",
            motor.family(),
            motor.id(),
            motor.feedback_id(),
            motor.control_id()
        );
    }
    println!("Press Ctrl+C to quit");

    loop {
        sleep(REFRESH);
        println!();
        for motor in &motors {
            match motor.feedback() {
                Some(fb) => println!(
                    "  {:?} id {}: encoder {:5} ({:6.1}°)  rpm {:6}  current {:6}  temp {:3}°C",
                    motor.family(),
                    motor.id(),
                    fb.encoder,
                    fb.angle().to_degrees(),
                    fb.rpm,
                    fb.current,
                    fb.temperature
                ),
                None => println!("  {:?} id {}: no feedback", motor.family(), motor.id()),
            }
        }
        // Nothing is commanded, so every resident payload should stay zero
        for motor in &motors {
            if let Some(group) = bus.group(motor.control_id()) {
                if group.payload() != [0; 8] {
                    println!(
                        "  control 0x{:03X} payload {:02X?}",
                        group.can_id(),
                        group.payload()
                    );
                }
            }
        }
    }
}
