//! fsgate CLI - Run file operations through a configured gateway
//!
//! Usage:
//!   fsgate -c gateway.json -u alice read docs notes/a.txt
//!   fsgate -c gateway.json -u alice write docs notes/a.txt --content hello
//!   fsgate -c gateway.json -u alice list docs reports -r
//!   fsgate -c gateway.json check
//!
//! Every command prints the normalized response as JSON and exits with 1
//! when the operation failed. Set RUST_LOG to see gateway logs on stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fsgate::{Gateway, GatewayConfig, Operation, OperationRequest};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// fsgate - Unified file gateway over pluggable storage providers
#[derive(Parser, Debug)]
#[command(name = "fsgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gateway configuration file (JSON)
    #[arg(short, long, default_value = "gateway.json")]
    config: PathBuf,

    /// User the operation runs as
    #[arg(short, long, default_value = "anonymous")]
    user: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Read a file
    Read { provider: String, path: String },
    /// Write a file from --content, --from-file, or nothing (empty file)
    Write {
        provider: String,
        path: String,
        #[arg(long, conflicts_with = "from_file")]
        content: Option<String>,
        #[arg(long)]
        from_file: Option<PathBuf>,
    },
    /// Delete a file or directory
    Delete { provider: String, path: String },
    /// List files below a directory
    List {
        provider: String,
        #[arg(default_value = "")]
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Show file metadata
    Stat { provider: String, path: String },
    /// Create a directory
    Mkdir { provider: String, path: String },
    /// Move a file within one provider
    Move {
        provider: String,
        from: String,
        to: String,
    },
    /// Copy a file within one provider
    Copy {
        provider: String,
        from: String,
        to: String,
    },
    /// Check every active provider
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = GatewayConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config: {}", args.config.display()))?;
    let gateway = Gateway::from_config(config)
        .await
        .context("Failed to start gateway")?;

    if let Cmd::Check = args.command {
        let mut healthy = true;
        for (id, ok) in gateway.test_connections().await {
            println!("{}\t{}", id, if ok { "ok" } else { "unreachable" });
            healthy &= ok;
        }
        std::process::exit(if healthy { 0 } else { 1 });
    }

    let request = build_request(args.command, &args.user)?;
    let response = gateway.execute(request).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to encode response")?
    );
    std::process::exit(if response.success { 0 } else { 1 });
}

fn build_request(command: Cmd, user: &str) -> Result<OperationRequest> {
    let request = match command {
        Cmd::Read { provider, path } => OperationRequest::new(Operation::Read, provider, path, user),
        Cmd::Write {
            provider,
            path,
            content,
            from_file,
        } => {
            let request = OperationRequest::new(Operation::Write, provider, path, user);
            match (content, from_file) {
                (Some(text), _) => request.content(text),
                (None, Some(file)) => {
                    let bytes = std::fs::read(&file)
                        .with_context(|| format!("Failed to read input: {}", file.display()))?;
                    request.binary_content(&bytes)
                }
                (None, None) => request,
            }
        }
        Cmd::Delete { provider, path } => {
            OperationRequest::new(Operation::Delete, provider, path, user)
        }
        Cmd::List {
            provider,
            path,
            recursive,
        } => OperationRequest::new(Operation::List, provider, path, user).recursive(recursive),
        Cmd::Stat { provider, path } => OperationRequest::new(Operation::Stat, provider, path, user),
        Cmd::Mkdir { provider, path } => {
            OperationRequest::new(Operation::Create, provider, path, user)
        }
        Cmd::Move { provider, from, to } => {
            OperationRequest::new(Operation::Move, provider, from, user).destination(to)
        }
        Cmd::Copy { provider, from, to } => {
            OperationRequest::new(Operation::Copy, provider, from, user).destination(to)
        }
        Cmd::Check => anyhow::bail!("check is not a file operation"),
    };
    Ok(request)
}
