//! `netconfd` server binary.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match netconfd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Telemetry may not be installed yet when bootstrap fails.
            let mut stderr = io::stderr().lock();
            drop(writeln!(stderr, "netconfd: {error}"));
            ExitCode::FAILURE
        }
    }
}
