use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod output;
mod tty;

use pipevisor::report::PipelineReport;
use pipevisor::{defaults, log_event, Result, Supervisor};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "pipevisor")]
#[command(version = VERSION)]
#[command(about = "Run a static list of programs as a pipeline and report how every stage ended")]
struct Cli {
    /// Stage table file (.json or .toml). Defaults to ~/.config/pipevisor/pipeline.json,
    /// then to the built-in table
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Exit with the status of the rightmost stage that failed
    #[arg(long)]
    pipefail: bool,

    /// Print the resolved stage table and exit without launching anything
    #[arg(long)]
    plan: bool,

    /// Print a JSON run summary to stderr once every stage is reaped
    #[arg(long)]
    report: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let exit_code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            output::print_error(&err);
            output::exit_code_for_error(err.code)
        }
    };

    std::process::exit(exit_code);
}

// Priority: RUST_LOG env var > --log-level CLI arg > default "info"
fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(tty::is_stderr_tty()),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

fn run(cli: &Cli) -> Result<i32> {
    let config = defaults::load(cli.config.as_deref())?;
    let table = config.stage_table()?;

    if cli.plan {
        output::print_success(&table)?;
        return Ok(0);
    }

    let outcome = Supervisor::with_os(&table).run()?;
    log_event!("Normal exit.");

    if cli.report {
        output::print_success_to_stderr(PipelineReport::from_outcome(&outcome))?;
    }

    if cli.pipefail || config.pipefail {
        Ok(outcome.pipefail_code())
    } else {
        Ok(0)
    }
}
