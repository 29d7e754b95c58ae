use ble_sensor_exporter::app::{self, Options};
use clap::Parser;
use log::{error, info};
use std::panic::{self, PanicHookInfo};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_logger(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logger(options.debug);

    tokio::select! {
        result = app::run(options) => match result {
            Ok(()) => std::process::exit(EXIT_SUCCESS),
            Err(why) => {
                error!("{}", why);
                std::process::exit(EXIT_ERROR);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            std::process::exit(EXIT_SUCCESS);
        }
    }
}
