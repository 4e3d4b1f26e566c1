//! thinkchat - conversational backend with visible thinking steps
//!
//! CLI entry point for running the server and talking to it.

use std::fs;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use futures::StreamExt;
use tracing::{debug, info, warn};

use thinkchat::cli::{Cli, Command, OutputFormat, get_log_path};
use thinkchat::compose::EnvelopeKind;
use thinkchat::config::Config;
use thinkchat::llm::create_client;
use thinkchat::service::{ChatRequest, ChatService};
use thinkchat::transport::{self, ChatClient, Frame};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    // Append so client commands do not clobber a running server's log
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;
    config.validate()?;

    let server = cli.server.clone().unwrap_or_else(|| config.server.bind.clone());

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            cmd_serve(&config, &bind).await
        }
        Command::Chat {
            message,
            session_id,
            quiet,
            local,
        } => {
            if local {
                cmd_chat_local(&config, session_id, &message, quiet).await
            } else {
                cmd_chat(&server, session_id, &message, quiet).await
            }
        }
        Command::Send { message, session_id } => cmd_send(&server, session_id, &message).await,
        Command::Summary { session_id } => cmd_summary(&server, &session_id).await,
        Command::History { session_id, format } => cmd_history(&server, &session_id, format).await,
        Command::Clear { session_id } => cmd_clear(&server, &session_id).await,
        Command::Ping => cmd_ping(&server).await,
    }
}

fn build_service(config: &Config) -> Result<ChatService> {
    config.validate_llm()?;
    let llm = create_client(&config.llm).context("Failed to create LLM client")?;
    ChatService::new(config, llm)
}

/// Run the server until SIGINT or SIGTERM
async fn cmd_serve(config: &Config, bind: &str) -> Result<()> {
    debug!(%bind, "cmd_serve: called");
    let service = build_service(config)?;
    let listener = transport::bind(bind).await?;
    let reaper = service.spawn_reaper(config);

    println!("{} listening on {}", "thinkchat".bold(), listener.local_addr()?.to_string().cyan());
    info!(provider = %config.llm.provider, model = %config.llm.model, "Server running. Press Ctrl+C to stop.");

    transport::serve(listener, service.clone(), shutdown_signal()).await?;

    info!("Server shutting down...");
    if let Some(reaper) = reaper {
        reaper.abort();
    }
    service.shutdown().await;
    debug!("cmd_serve: shutdown complete");
    Ok(())
}

/// Resolve when the process is asked to stop
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigint, mut sigterm) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            _ => {
                warn!("shutdown_signal: failed to install handlers, falling back to ctrl_c");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        warn!("ctrl_c received");
    }
}

fn print_frame(frame: &Frame, quiet: bool) {
    match frame {
        Frame::Thinking { content, .. } if !quiet => {
            println!("{}", content.dimmed());
            println!();
        }
        Frame::Response { content, .. } => println!("{}", content),
        _ => {}
    }
}

fn print_session(session_id: &str) {
    eprintln!("{} {}", "session:".dimmed(), session_id.yellow());
}

async fn cmd_chat(server: &str, session_id: Option<String>, message: &str, quiet: bool) -> Result<()> {
    debug!(%server, ?session_id, quiet, "cmd_chat: called");
    let client = ChatClient::new(server);
    let session_id = client.chat(session_id, message, |frame| print_frame(frame, quiet)).await?;
    print_session(&session_id);
    Ok(())
}

/// Run one chat turn without a server
async fn cmd_chat_local(config: &Config, session_id: Option<String>, message: &str, quiet: bool) -> Result<()> {
    debug!(?session_id, quiet, "cmd_chat_local: called");
    let service = build_service(config)?;
    let mut stream = service.stream_chat(ChatRequest::new(session_id, message)).await?;
    let session_id = stream.session_id().to_string();

    while let Some(item) = stream.next().await {
        let envelope = item?;
        match envelope.kind {
            EnvelopeKind::Thinking if quiet => {}
            EnvelopeKind::Thinking => {
                println!("{}", envelope.content.dimmed());
                println!();
            }
            EnvelopeKind::Response => println!("{}", envelope.content),
        }
    }

    print_session(&session_id);
    service.shutdown().await;
    Ok(())
}

async fn cmd_send(server: &str, session_id: Option<String>, message: &str) -> Result<()> {
    debug!(%server, ?session_id, "cmd_send: called");
    let (session_id, content) = ChatClient::new(server).send(session_id, message).await?;
    println!("{}", content);
    print_session(&session_id);
    Ok(())
}

async fn cmd_summary(server: &str, session_id: &str) -> Result<()> {
    debug!(%server, %session_id, "cmd_summary: called");
    let summary = ChatClient::new(server).summary(session_id).await?;
    println!("{}", summary);
    Ok(())
}

async fn cmd_history(server: &str, session_id: &str, format: OutputFormat) -> Result<()> {
    debug!(%server, %session_id, %format, "cmd_history: called");
    let turns = ChatClient::new(server).history(session_id).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&turns)?),
        OutputFormat::Text => {
            if turns.is_empty() {
                println!("No turns recorded for {}", session_id);
            }
            for turn in &turns {
                let role = format!("{:>9}", turn.role.as_str());
                let role = match turn.role {
                    sessionstore::Role::User => role.green(),
                    sessionstore::Role::Assistant => role.blue(),
                };
                println!("{}  {}", role.bold(), turn.content);
            }
        }
    }
    Ok(())
}

async fn cmd_clear(server: &str, session_id: &str) -> Result<()> {
    debug!(%server, %session_id, "cmd_clear: called");
    if ChatClient::new(server).clear(session_id).await? {
        println!("Cleared session {}", session_id.yellow());
    } else {
        println!("No session {}", session_id.yellow());
    }
    Ok(())
}

async fn cmd_ping(server: &str) -> Result<()> {
    debug!(%server, "cmd_ping: called");
    match ChatClient::new(server).ping().await {
        Ok(version) => {
            println!("Server at {} is {}", server, "alive".green());
            println!("Version: {}", version);
        }
        Err(e) => {
            println!("Server at {} is {}", server, "not responding".red());
            println!("Error: {}", e);
        }
    }
    Ok(())
}
