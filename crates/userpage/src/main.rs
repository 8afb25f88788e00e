//! Userpage.
//!
//! Prefetches a list of users, and prints them as soon as all of them finished loading. While any
//! of them is still pending, a loading placeholder is shown instead.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod logging;
mod output;
mod render;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
