//! CLI definitions and plumbing.

use std::{num::NonZeroUsize, path::Path};

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log more detail (repeat for more)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Only log errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate the sources of every package in a workspace
    Generate {
        #[arg(short = 'w', long)]
        workspace: Option<Box<Path>>,
        /// Write artifacts below this directory instead of the workspace
        #[arg(short = 'o', long = "output")]
        output: Option<Box<Path>>,
        #[arg(short = 'j', long)]
        jobs: Option<NonZeroUsize>,
        /// Print the planned artifacts without writing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Resolve and bind every package without generating anything
    Check {
        #[arg(short = 'w', long)]
        workspace: Option<Box<Path>>,
        #[arg(short = 'j', long)]
        jobs: Option<NonZeroUsize>,
    },
}

impl Cli {
    /// The log filter used when `RUST_LOG` is unset.
    pub fn default_filter(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbosity_picks_the_filter() {
        let parse = |args: &[&str]| Cli::try_parse_from(args).unwrap().default_filter();

        assert_eq!(parse(&["portgen", "check"]), "warn");
        assert_eq!(parse(&["portgen", "-v", "check"]), "debug");
        assert_eq!(parse(&["portgen", "check", "-vv"]), "trace");
        assert_eq!(parse(&["portgen", "-q", "check"]), "error");
    }

    #[test]
    fn generate_arguments() {
        let cli = Cli::try_parse_from([
            "portgen", "generate", "-w", "ws", "-o", "out", "-j", "3", "--dry-run",
        ])
        .unwrap();

        let Command::Generate {
            workspace,
            output,
            jobs,
            dry_run,
        } = cli.command
        else {
            panic!("expected generate");
        };
        assert_eq!(workspace.as_deref(), Some(Path::new("ws")));
        assert_eq!(output.as_deref(), Some(Path::new("out")));
        assert_eq!(jobs, NonZeroUsize::new(3));
        assert!(dry_run);
    }

    #[test]
    fn zero_jobs_are_rejected() {
        assert!(Cli::try_parse_from(["portgen", "check", "-j", "0"]).is_err());
    }
}
