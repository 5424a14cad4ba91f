//! CLI argument definitions for Morn.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Morn -- a streaming conversational agent gateway.
#[derive(Parser)]
#[command(
    name = "morn",
    version,
    about = "Morn -- streaming conversational agent gateway",
    long_about = "Serves a reasoning agent over HTTP, streaming each turn as typed \
                  content blocks and keeping per-thread conversation history."
)]
pub struct Cli {
    /// Path to a TOML configuration file (default: config/morn.toml when present).
    #[arg(long, short, global = true, env = "MORN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Address to bind the HTTP server to.
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on.
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the resolved configuration as TOML, with secrets redacted.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_flags_are_optional() {
        let cli = Cli::try_parse_from(["morn", "serve"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Serve {
                host: None,
                port: None
            }
        ));

        let cli = Cli::try_parse_from([
            "morn", "serve", "--host", "0.0.0.0", "-p", "8000", "--config", "x.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
                assert_eq!(port, Some(8000));
            }
            Commands::Config => panic!("expected serve"),
        }
    }
}
