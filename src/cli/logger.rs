// Logging utilities for CLI
use std::io::Write;

/// Initialize logger for CLI
pub fn init_logger(verbose: bool, quiet: bool) {
    // RUST_LOG overrides the flags entirely
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
        return;
    }

    let default_level = if quiet {
        log::LevelFilter::Error
    } else if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(default_level)
        .format(|buf, record| {
            if record.level() >= log::Level::Debug {
                writeln!(buf, "[{}] {}", record.level(), record.args())
            } else {
                writeln!(buf, "{}", record.args())
            }
        })
        .init();
}
