//! CLI argument parsing using clap

use crate::graph::Direction;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// asrc-route - audio routing negotiation and converter allocation
///
/// Runs stream-open negotiation against an in-memory register file and a
/// simulated firmware core, using a TOML platform description
#[derive(Parser, Debug)]
#[command(name = "asrc-route")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Platform description (default: built-in reference platform)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Point a selector at a neighbour before running (SELECTOR=TARGET, repeatable)
    #[arg(short, long, global = true, value_name = "SELECTOR=TARGET")]
    pub select: Vec<String>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show nodes, selectors, format slots and converter pools
    Show,

    /// Print the live path from a node
    Discover {
        /// Start node name
        node: String,
        /// playback or capture
        direction: Direction,
    },

    /// Resolve the target format seen from a node
    Resolve {
        node: String,
        direction: Direction,
    },

    /// Negotiate a stream open on a DMA channel
    Open {
        channel: u8,
        direction: Direction,
        rate: u32,
        width: u32,
        channels: u32,
    },

    /// Pin a converter unit to a channel
    Lock {
        channel: u8,
        direction: Direction,
        unit: u8,
    },

    /// Replay slot formats and pinned units as after a power cycle
    Restore,

    /// Print the reference platform description as TOML
    SampleConfig,
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }

    /// Parsed `--select` pairs
    pub fn selections(&self) -> Result<Vec<(String, String)>, String> {
        self.select
            .iter()
            .map(|s| match s.split_once('=') {
                Some((sel, target)) if !sel.is_empty() => {
                    Ok((sel.trim().to_string(), target.trim().to_string()))
                }
                _ => Err(format!("expected SELECTOR=TARGET, got '{}'", s)),
            })
            .collect()
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Show
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_open() {
        let args = Args::parse_from([
            "asrc-route",
            "-v",
            "--select",
            "SPUS OUT0=SIFS1",
            "open",
            "0",
            "playback",
            "44100",
            "16",
            "2",
        ]);
        assert_eq!(
            args.command,
            Some(Command::Open {
                channel: 0,
                direction: Direction::Playback,
                rate: 44100,
                width: 16,
                channels: 2
            })
        );
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
        assert_eq!(
            args.selections().unwrap(),
            vec![("SPUS OUT0".to_string(), "SIFS1".to_string())]
        );
    }

    #[test]
    fn test_bad_selection() {
        let args = Args::parse_from(["asrc-route", "-s", "nope", "show"]);
        assert!(args.selections().is_err());
    }

    #[test]
    fn test_quiet_wins() {
        let args = Args::parse_from(["asrc-route", "-q", "-vv"]);
        assert_eq!(args.log_level(), tracing::Level::ERROR);
        assert_eq!(args.command.unwrap_or_default(), Command::Show);
    }
}
