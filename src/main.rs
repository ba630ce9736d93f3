use std::process::ExitCode;

use clap::Parser;

use equiv6502::config::{Cli, Config};
use equiv6502::harness::{self, report};

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = Config::from(cli);
    tracing::debug!(?config, "starting");

    let suite = match harness::run_suite(&config) {
        Ok(suite) => suite,
        Err(errors) => {
            for error in errors {
                println!("Error: {error}");
            }
            return ExitCode::FAILURE;
        }
    };

    if let Some(path) = &config.json_report {
        if let Err(e) = report::write_json_report(path, &config, &suite) {
            tracing::error!(path = %path.display(), error = %e, "unable to write JSON report");
            return ExitCode::FAILURE;
        }
    }

    if suite.summary.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
