use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod conformance;

#[derive(Parser)]
#[command(name = "xylem", version, about = "XPath 1.0 engine and minimal XSLT 1.0 driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the XSLT conformance suite (XSLT-testsuite-04, unpacked).
    RunConformance {
        /// Path to the unpacked conformance test suite.
        suite_path: PathBuf,
        /// Test names (exact, e.g. `axes_axes01`) or category prefixes
        /// (e.g. `axes`) to run; everything when empty.
        tests: Vec<String>,
        /// Stop at the first failing test.
        #[arg(long)]
        fail_fast: bool,
        /// Skip tests known to be disproportionally slow.
        #[arg(long)]
        skip_slow: bool,
        /// Log expression evaluation and template selection.
        #[arg(long)]
        trace: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::RunConformance {
            suite_path,
            tests,
            fail_fast,
            skip_slow,
            trace,
        } => {
            let mut builder = env_logger::Builder::from_default_env();
            if trace {
                builder.filter_level(log::LevelFilter::Trace);
            }
            builder.init();

            let options = conformance::Options {
                fail_fast,
                skip_slow,
                filters: tests,
            };
            match conformance::run_conformance(&suite_path, &options) {
                Ok(0) => ExitCode::SUCCESS,
                Ok(_) => ExitCode::FAILURE,
                Err(e) => {
                    eprintln!("error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
