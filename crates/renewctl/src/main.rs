//! Renewctl.
//!
//! Wraps an external command into a renewable cache and polls it from several threads, which
//! makes it easy to try out period configurations against a real upstream.

#![warn(missing_debug_implementations, unused_crate_dependencies, clippy::all)]

mod cli;
mod command;
mod config;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
