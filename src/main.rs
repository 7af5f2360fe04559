//! # thinclient
//!
//! Headless thin terminal. Wires the connection, sandbox bridges, input,
//! local state and voice session together and drives them from stdin:
//!
//! ```text
//! view weather          switch view (app views mount a bridge)
//! press KeyM            key down + up
//! down Enter / up Enter hold and release
//! wheel 0 -120          scroll
//! voice toggle          start|stop|toggle|close
//! post {"type": ...}    message from the mounted surface
//! reconnect | status | quit
//! ```

#![deny(unsafe_code)]

mod app;
mod headless;
mod view;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use thinclient_settings::ThinClientSettings;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app::AppContext;
use crate::headless::Command;

/// Thin client terminal.
#[derive(Parser, Debug)]
#[command(name = "thinclient", about = "Headless thin terminal for a DeskThing backend")]
struct Cli {
    /// Backend host (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Backend port (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Client id to present to the backend.
    #[arg(long)]
    client_id: Option<String>,

    /// Settings file (defaults to `~/.thinclient/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(self, settings: &mut ThinClientSettings) {
        if let Some(host) = self.host {
            settings.server.host = Some(host);
        }
        if let Some(port) = self.port {
            settings.server.port = Some(port);
        }
        if let Some(id) = self.client_id {
            settings.client.client_id = Some(id);
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

fn load(path: Option<&Path>) -> Result<ThinClientSettings> {
    match path {
        Some(path) => thinclient_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => thinclient_settings::load_settings().context("Failed to load settings"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load(cli.settings.as_deref())?;
    cli.apply(&mut settings);

    if settings.logging.json {
        thinclient_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        thinclient_core::logging::init_subscriber(&settings.logging.level);
    }

    tracing::info!(
        host = settings.server.host.as_deref().unwrap_or("-"),
        port = ?settings.server.port,
        "starting thin client"
    );

    let app = AppContext::new(settings);
    app.start().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line.context("Failed to read stdin")? {
                    Some(line) => match Command::parse(&line) {
                        Ok(Some(command)) => {
                            if !app.execute(command).await {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => tracing::warn!(%err, "bad command"),
                    },
                    None => {
                        tracing::debug!("stdin closed; running until ctrl-c");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    app.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
