//! # lapse - offline companion to the agent
//!
//! - `lapse check`: validate a rule file
//! - `lapse inspect`: show what the agent would do to a class
//! - `lapse transform`: rewrite classes ahead of time

use clap::Parser;
use lapse::cli::{self, Args};
use std::io::Write;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    let mut stdout = std::io::stdout().lock();
    let result = cli::run(args, &mut stdout);
    let _ = stdout.flush();
    drop(stdout);
    std::process::exit(match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}
