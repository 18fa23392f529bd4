//! Process-wide log sink
//!
//! `init` installs an `env_logger` sink whose formatter scrubs secret
//! environment values; `teardown` flushes it before the process exits.

use qy_core::{EnvSnapshot, SecretScrubber};
use std::io::Write;

/// Filter used when neither `--verbose` nor `RUST_LOG` says otherwise
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

/// Format one record, scrubbing secrets from the message
pub(crate) fn format_record(scrubber: &SecretScrubber, level: log::Level, target: &str, message: &str) -> String {
    let target = target.split("::").next().unwrap_or(target);
    format!("[{:<5} {}] {}", level, target, scrubber.scrub(message))
}

/// Install the log sink; later calls are no-ops
pub fn init(verbose: bool) {
    let scrubber = EnvSnapshot::from_process().scrubber();
    let env = env_logger::Env::default().default_filter_or(default_filter(verbose));
    let result = env_logger::Builder::from_env(env)
        .format(move |buf, record| {
            let line = format_record(
                &scrubber,
                record.level(),
                record.target(),
                &record.args().to_string(),
            );
            writeln!(buf, "{}", line)
        })
        .try_init();
    if result.is_err() {
        log::debug!("Log sink already installed");
    }
}

/// Flush buffered log output
pub fn teardown() {
    log::logger().flush();
}
