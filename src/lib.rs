pub mod can;
pub mod config;
pub mod kinematics;
pub mod messages;
pub mod motor;
pub mod runtime;
