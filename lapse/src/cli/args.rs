//! CLI argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "lapse",
    version,
    about = "Inspect and apply lapse method-timing instrumentation offline",
    after_help = "\
EXAMPLES:
    lapse check --config lapse-agent.json
    lapse inspect target/classes/com/example/Foo.class --config lapse-agent.json
    lapse transform --config lapse-agent.json --out instrumented/ Foo.class Bar.class"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load a rule file and summarise it
    Check {
        /// Rule file (JSON)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// List a class's methods and what a rewrite would do to each
    Inspect {
        /// Compiled class file
        #[arg(value_name = "CLASS")]
        class: PathBuf,

        /// Rule file; without it every method is reported as untouched
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Also disassemble rewritten wrapper bodies
        #[arg(long)]
        disassemble: bool,
    },

    /// Rewrite class files ahead of time
    Transform {
        /// Rule file (JSON)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Output root; classes are written under their package path
        #[arg(short, long, value_name = "DIR")]
        out: PathBuf,

        /// Compiled class files
        #[arg(value_name = "CLASS", required = true)]
        classes: Vec<PathBuf>,
    },
}
