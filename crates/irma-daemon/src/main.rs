//! irma-daemon - IRMA server for verifying and issuing attributes.
//!
//! Reads its configuration from a TOML file, overridden by CLI flags,
//! then serves the requestor surface at `/session/` and the IRMA client
//! surface at `/irma/` on one listener. A background reaper expires
//! sessions that outlive their timeouts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use irma_daemon::config::{Requestor, ServerConfig};
use irma_daemon::verifier::StructuralVerifier;
use irma_daemon::{reaper, server, ServerState};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// IRMA server for verifying and issuing attributes.
#[derive(Parser, Debug)]
#[command(name = "irma-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// External URL to the server, to which the IRMA client connects
    #[arg(short, long)]
    url: Option<String>,

    /// Address at which to listen
    #[arg(short, long)]
    listen_addr: Option<String>,

    /// Port at which to listen
    #[arg(short, long)]
    port: Option<u16>,

    /// Whether or not to authenticate requestors
    #[arg(long)]
    no_auth: Option<bool>,

    /// Production mode
    #[arg(long)]
    production: bool,

    /// Max age in seconds of a session request JWT
    #[arg(long)]
    max_request_age: Option<u64>,

    /// JWT issuer name for server-signed session statements
    #[arg(short, long)]
    jwt_issuer: Option<String>,

    /// Base64-encoded JWT signing key
    #[arg(long)]
    jwt_secret: Option<String>,

    /// Attributes that all requestors may verify (comma separated)
    #[arg(long, value_delimiter = ',')]
    disclose_perms: Option<Vec<String>>,

    /// Attributes that all requestors may request in signatures
    #[arg(long, value_delimiter = ',')]
    sign_perms: Option<Vec<String>>,

    /// Attributes that all requestors may issue
    #[arg(long, value_delimiter = ',')]
    issue_perms: Option<Vec<String>>,

    /// Requestor configuration (JSON)
    #[arg(long)]
    requestors: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ServerConfig::default(),
    };

    // CLI flags override file values.
    if let Some(url) = &args.url {
        config.url.clone_from(url);
    }
    if let Some(listen_addr) = &args.listen_addr {
        config.listen_addr.clone_from(listen_addr);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.no_auth.is_some() {
        config.no_auth = args.no_auth;
    }
    if args.production {
        config.production = true;
    }
    if args.max_request_age.is_some() {
        config.max_request_age = args.max_request_age;
    }
    if let Some(issuer) = &args.jwt_issuer {
        config.jwt_issuer = Some(issuer.clone());
    }
    if let Some(secret) = &args.jwt_secret {
        config.jwt_secret = Some(secret.clone());
    }
    if let Some(perms) = &args.disclose_perms {
        config.disclose_perms = Some(perms.iter().map(|p| p.as_str().into()).collect());
    }
    if let Some(perms) = &args.sign_perms {
        config.sign_perms = Some(perms.iter().map(|p| p.as_str().into()).collect());
    }
    if let Some(perms) = &args.issue_perms {
        config.issue_perms = Some(perms.iter().map(|p| p.as_str().into()).collect());
    }
    if let Some(requestors) = &args.requestors {
        config.requestors = serde_json::from_str::<HashMap<String, Requestor>>(requestors)
            .context("failed to parse requestors from JSON")?;
    }

    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate.recv() => {},
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    let config = build_config(&args)?;
    let addr = format!(
        "{}:{}",
        if config.listen_addr.is_empty() {
            "0.0.0.0"
        } else {
            &config.listen_addr
        },
        config.listen_port()
    );

    let state = Arc::new(
        ServerState::new(config, Arc::new(StructuralVerifier))
            .context("failed to configure server")?,
    );

    // Hand finished results to callback delivery. The delivery transport
    // itself is the embedding application's concern; the hook fires once
    // per terminal update.
    state.store().on_change(Box::new(|session, result| {
        if result.status.finished() {
            if let Some(url) = &session.request().base().result_callback_url {
                info!(
                    session = %session.token(),
                    status = %result.status,
                    callback = %url,
                    "session finished, result ready for callback delivery"
                );
            }
        }
    }));

    let reaper_handle = reaper::spawn(Arc::clone(state.store()));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, url = %state.config().url, "irma server listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    reaper_handle.abort();
    info!("server stopped");
    Ok(())
}
