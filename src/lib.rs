pub mod actuator;
pub mod autonomous;
pub mod brain;
pub mod cancel;
pub mod chassis;
pub mod config;
pub mod controller;
pub mod display;
pub mod drivebase;
pub mod error;
pub mod input;
pub mod logging;
pub mod modes;
pub mod motion;
pub mod odometry;
pub mod robot;
pub mod sim;
pub mod units;
pub mod vec;
