use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Command};
use portgen::driver;
use tracing_subscriber::EnvFilter;

// executable-specific modules
mod cli;

pub fn interface(cli: Cli) -> driver::Result {
    match cli.command {
        Command::Generate {
            workspace,
            output,
            jobs,
            dry_run,
        } => {
            let workspace = match workspace {
                Some(path) => path,
                None => driver::default_workspace()?,
            };

            let summary = driver::generate(&driver::Generate {
                workspace,
                output,
                jobs,
                dry_run,
            })?;

            if dry_run {
                for path in &summary.paths {
                    println!("{path}");
                }
            }

            Ok(())
        }
        Command::Check { workspace, jobs } => {
            let workspace = match workspace {
                Some(path) => path,
                None => driver::default_workspace()?,
            };

            let summary = driver::check(&workspace, jobs)?;
            println!("{} package(s) ok", summary.packages);
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.default_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    match interface(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            for line in error.diagnostics() {
                eprintln!("{line}");
            }
            ExitCode::FAILURE
        }
    }
}
