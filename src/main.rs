use std::process::ExitCode;

use clap::Parser;
use filter_media::{
    cli::{self, Args},
    config::config,
    driver,
    relay::Termination,
};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if cli::is_informational(&e) => e.exit(),
        Err(e) => {
            eprintln!("usage: {}", cli::USAGE);
            eprintln!("{}", e);
            return ExitCode::from(config().exit_failure());
        }
    };

    match driver::run(&args).await {
        Ok(Termination::EndOfStream) => ExitCode::SUCCESS,
        Ok(termination) => {
            log::warn!("run ended: {:?}", termination);
            ExitCode::from(config().exit_bus_error())
        }
        Err(e) => {
            eprintln!("{:#}", e);
            log::debug!("{:?}", e);
            ExitCode::from(config().exit_failure())
        }
    }
}
