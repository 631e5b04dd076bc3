use clap::Parser as _;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};
use tracing_subscriber::filter::{LevelFilter, targets::Targets};
use vgreen_motor_tools::commands::{self, control::Action};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Items(commands::items::Args),
    Status(commands::status::Args),
    /// Start the motor.
    Go(commands::control::Args),
    /// Stop the motor.
    Stop(commands::control::Args),
    /// Persist the configuration to flash.
    Store(commands::control::Args),
    Demand(commands::demand::Args),
    Sensors(commands::sensors::Args),
    Identify(commands::identify::Args),
    Config(commands::config::Args),
    SetConfig(commands::set_config::Args),
    ScheduleRead(commands::schedule_read::Args),
    ScheduleWrite(commands::schedule_write::Args),
    RawSensor(commands::raw_sensor::Args),
    RawConfig(commands::raw_config::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter = std::env::var("VGREEN_MOTOR_TOOLS_LOG")
        .ok()
        .and_then(|description| match description.parse::<Targets>() {
            Ok(filter) => Some(filter),
            Err(e) => {
                eprintln!("warning: ignoring VGREEN_MOTOR_TOOLS_LOG: {e}");
                None
            }
        })
        .unwrap_or_else(|| Targets::new().with_default(LevelFilter::WARN));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Items(args) => end(commands::items::run(args)),
        Commands::Status(args) => end(commands::status::run(args)),
        Commands::Go(args) => end(commands::control::run(Action::Go, args)),
        Commands::Stop(args) => end(commands::control::run(Action::Stop, args)),
        Commands::Store(args) => end(commands::control::run(Action::StoreConfig, args)),
        Commands::Demand(args) => end(commands::demand::run(args)),
        Commands::Sensors(args) => end(commands::sensors::run(args)),
        Commands::Identify(args) => end(commands::identify::run(args)),
        Commands::Config(args) => end(commands::config::run(args)),
        Commands::SetConfig(args) => end(commands::set_config::run(args)),
        Commands::ScheduleRead(args) => end(commands::schedule_read::run(args)),
        Commands::ScheduleWrite(args) => end(commands::schedule_write::run(args)),
        Commands::RawSensor(args) => end(commands::raw_sensor::run(args)),
        Commands::RawConfig(args) => end(commands::raw_config::run(args)),
    }
}
