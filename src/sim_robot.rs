use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use parking_lot::Mutex;

use sparkplug::autonomous::Routine;
use sparkplug::chassis::MotionExecutor;
use sparkplug::config::RobotConfig;
use sparkplug::controller::{Buttons, ControllerState};
use sparkplug::logging;
use sparkplug::robot::Robot;
use sparkplug::sim::SimBrain;

#[derive(Parser, Debug)]
#[command(name = "sim")]
#[command(version)]
#[command(about = "Drive the robot program against a simulated brain")]
struct Args {
    /// Robot configuration (TOML). Built-in defaults when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log as in a match: warnings and failures only.
    #[arg(long)]
    competition: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Control ticks to run before stopping.
    #[arg(short, long, default_value_t = 500)]
    ticks: u64,

    /// Start this autonomous routine (`simple`, `intake-sweep`) on the first tick.
    #[arg(short, long)]
    auton: Option<Routine>,

    /// Left stick Y held for the whole run, -1..1.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    forward: f64,

    /// Left stick X held for the whole run, -1..1.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    turn: f64,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("sim failed: {e}");
            eprintln!("sim failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => RobotConfig::load(path)?,
        None => RobotConfig::default(),
    };
    config.logging.competition |= args.competition;
    config.logging.verbose |= args.verbose;
    logging::init(&config.logging)?;
    log::info!("sparkplug sim v{} starting", env!("CARGO_PKG_VERSION"));

    let sim = Arc::new(Mutex::new(SimBrain::new(config.teleop.tick())));
    sim.lock().set_controller(ControllerState::from_normalised(
        [args.turn, args.forward, 0.0, 0.0],
        Buttons::empty(),
    ));

    let chassis = config.chassis_builder(sim.clone()).build_odometry();
    let mut robot = Robot::new(
        sim.clone(),
        chassis,
        &config.implements,
        config.teleop,
        config.events(),
    );
    if let Some(routine) = args.auton {
        robot.start_autonomous(routine);
    }
    robot.run(Some(args.ticks));

    let pose = robot.chassis().pose();
    log::info!(
        "final pose x={:.1}mm y={:.1}mm heading={:.1}deg after {} brain updates",
        pose.x,
        pose.y,
        pose.heading,
        sim.lock().update_count()
    );
    Ok(())
}
