//! CLI command implementations.

use anyhow::{Context, Result};
use codegauge_sync::{SyncConfig, SyncOrchestrator};
use codegauge_types::{RepoStatus, Severity};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Stay connected and print acknowledgements until Ctrl-C.
pub async fn watch(config: &SyncConfig) -> Result<()> {
    let orchestrator =
        SyncOrchestrator::from_config(config).context("failed to build sync client")?;
    let mut acks = orchestrator.acknowledgements();
    let mut connectivity = orchestrator.connection().connectivity();

    orchestrator.start(config.user_id.clone()).await;
    println!("Watching {} (Ctrl-C to stop)", config.ws_url);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                if *connectivity.borrow_and_update() {
                    println!("Connected");
                } else {
                    println!("Disconnected, retrying");
                }
            }
            ack = acks.recv() => match ack {
                Ok(ack) => println!("{ack}"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Output fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// Load the current state, print it and exit.
pub async fn snapshot(config: &SyncConfig, timeout_secs: u64) -> Result<()> {
    let orchestrator =
        SyncOrchestrator::from_config(config).context("failed to build sync client")?;
    let mut sessions = orchestrator.connection().sessions();

    orchestrator.start(config.user_id.clone()).await;
    let connected = tokio::time::timeout(Duration::from_secs(timeout_secs), sessions.recv())
        .await
        .is_ok();
    if !connected {
        warn!(timeout_secs, "Push connection not established; showing REST data only");
    }

    let store = orchestrator.store();
    println!("Codegauge Status");
    println!("================");
    println!();
    println!("Push: {}", if connected { "connected" } else { "offline" });
    println!();

    if store.projects().is_loaded() {
        let projects = store.projects().snapshot();
        println!("Projects ({})", projects.len());
        for project in projects {
            println!(
                "  {:<32} {:<10} {}",
                project.name,
                project.status.map_or("-", RepoStatus::as_str),
                project.id
            );
        }
    } else {
        println!("Projects: not loaded");
    }

    if store.issues().is_loaded() {
        let issues = store.issues().snapshot();
        let count = |severity: Severity| issues.iter().filter(|i| i.severity == severity).count();
        println!();
        println!(
            "Issues: {} total, {} blocker, {} critical",
            issues.len(),
            count(Severity::Blocker),
            count(Severity::Critical)
        );
    }

    if store.notifications().is_loaded() {
        let unread = store
            .notifications()
            .snapshot()
            .iter()
            .filter(|n| !n.is_read)
            .count();
        println!("Unread notifications: {unread}");
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// Print the effective configuration as YAML.
pub fn show_config(config: &SyncConfig) -> Result<()> {
    let mut shown = config.clone();
    if shown.auth_token.is_some() {
        shown.auth_token = Some("<redacted>".to_string());
    }
    print!("{}", serde_yaml::to_string(&shown)?);
    Ok(())
}
