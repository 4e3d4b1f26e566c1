//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// thinkchat - conversational backend with visible thinking steps
#[derive(Parser)]
#[command(
    name = "tc",
    about = "Chat backend that streams thinking steps ahead of model answers",
    version = env!("CARGO_PKG_VERSION"),
    after_help = generate_after_help(),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Server address for client commands (defaults to server.bind)
    #[arg(short, long, global = true, help = "Server address for client commands")]
    pub server: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the chat server in the foreground
    Serve {
        /// Address to bind (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Send a message and stream thinking steps and the answer
    Chat {
        /// Message to send
        message: String,

        /// Continue an existing session
        #[arg(short = 'i', long = "session")]
        session_id: Option<String>,

        /// Hide thinking steps
        #[arg(long)]
        quiet: bool,

        /// Run in-process instead of talking to a server
        #[arg(long)]
        local: bool,
    },

    /// Send a message and print the answer in one piece
    Send {
        /// Message to send
        message: String,

        /// Continue an existing session
        #[arg(short = 'i', long = "session")]
        session_id: Option<String>,
    },

    /// Show the summary of a session
    Summary {
        /// Session ID
        session_id: String,
    },

    /// Show the turns of a session
    History {
        /// Session ID
        session_id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Forget a session
    Clear {
        /// Session ID
        session_id: String,
    },

    /// Check the server is alive and responsive
    Ping,
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("thinkchat")
        .join("logs")
        .join("thinkchat.log")
}

/// Help footer pointing at the log file
pub fn generate_after_help() -> String {
    format!("Logs are written to: {}", get_log_path().display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve() {
        let cli = Cli::parse_from(["tc", "serve", "--bind", "0.0.0.0:9000"]);
        match cli.command {
            Command::Serve { bind } => assert_eq!(bind.as_deref(), Some("0.0.0.0:9000")),
            other => panic!("Expected Serve command, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_chat() {
        let cli = Cli::parse_from(["tc", "chat", "What is the weather?", "-i", "s1", "--quiet"]);
        if let Command::Chat {
            message,
            session_id,
            quiet,
            local,
        } = cli.command
        {
            assert_eq!(message, "What is the weather?");
            assert_eq!(session_id.as_deref(), Some("s1"));
            assert!(quiet);
            assert!(!local);
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_cli_parse_history_json() {
        let cli = Cli::parse_from(["tc", "history", "s1", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Command::History {
                format: OutputFormat::Json,
                ..
            }
        ));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from(["tc", "ping", "-c", "/path/to/config.yml", "--server", "127.0.0.1:9000"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
        assert_eq!(cli.server.as_deref(), Some("127.0.0.1:9000"));
        assert!(matches!(cli.command, Command::Ping));
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["tc"]).is_err());
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_log_path() {
        assert!(get_log_path().ends_with("thinkchat/logs/thinkchat.log"));
    }
}
