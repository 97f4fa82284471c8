//! Device status monitoring daemon
//!
//! Renders a status board for the configured devices, polls it on the
//! configured interval and reacts to badge transitions:
//! - every transition is logged
//! - going offline / coming back online raises a desktop notification
//!   when notifications are enabled

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::AppConfig;
use crate::dom::Document;
use crate::format::format_duration;
use crate::status::board::{render_board, BadgeState};
use crate::status::client::HttpStatusClient;
use crate::status::{StatusChange, StatusPoller};

/// Poll the configured devices until interrupted.
/// Must run inside a [`tokio::task::LocalSet`].
pub async fn start_monitoring(config: &AppConfig) -> Result<()> {
    if config.devices.is_empty() {
        tracing::warn!("No devices configured, nothing to monitor");
        return Ok(());
    }

    let mut doc = Document::new();
    let root = doc.root();
    render_board(&mut doc, root, &config.devices);

    let client = HttpStatusClient::new(&config.base_url)?;
    let poller = StatusPoller::new(doc.into_shared(), client, config.poller_options())?;
    let mut changes = poller.changes();
    let _polling = poller.spawn_polling(Duration::from_secs(config.poll_interval_secs));

    tracing::info!(
        "Monitoring {} devices at {} every {}s",
        config.devices.len(),
        config.base_url,
        config.poll_interval_secs
    );

    watch_changes(config, &mut changes, tokio::signal::ctrl_c()).await;
    Ok(())
}

/// Handle changes until the channel closes or `interrupt` resolves.
/// Returns how many changes were handled.
async fn watch_changes<F>(
    config: &AppConfig,
    changes: &mut UnboundedReceiver<StatusChange>,
    interrupt: F,
) -> usize
where
    F: Future,
{
    // Pinned once so a signal that lands mid-handling is still seen
    tokio::pin!(interrupt);
    let mut handled = 0;

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Some(change) => {
                    handle_change(config, &change);
                    handled += 1;
                }
                None => break,
            },
            _ = &mut interrupt => {
                tracing::info!("Interrupted, stopping monitor");
                break;
            }
        }
    }

    handled
}

fn handle_change(config: &AppConfig, change: &StatusChange) {
    let name = config
        .devices
        .iter()
        .find(|d| d.id == change.entity_id)
        .map(|d| d.display_name())
        .unwrap_or(change.entity_id.as_str());

    let Some(message) = describe_change(name, change, Utc::now()) else {
        return;
    };

    match change.current {
        BadgeState::Offline => tracing::warn!("{}", message),
        _ => tracing::info!("{}", message),
    }

    // First sighting of a device is not worth a notification
    if config.notifications && change.previous != BadgeState::Unknown {
        match change.current {
            BadgeState::Offline => notify_offline(&message),
            BadgeState::Online => notify_online(&message),
            BadgeState::Unknown => {}
        }
    }
}

/// Human readable line for a transition, `None` when nothing changed
fn describe_change(name: &str, change: &StatusChange, now: DateTime<Utc>) -> Option<String> {
    if change.previous == change.current {
        return None;
    }

    let message = match (change.previous, change.current) {
        (BadgeState::Unknown, current) => format!("{} is {}", name, current.label().to_lowercase()),
        (_, BadgeState::Offline) => match change.last_seen_at {
            Some(seen) => {
                let ago = (now - seen).num_seconds().max(0) as u64;
                format!("{} went offline (last ping {} ago)", name, format_duration(ago))
            }
            None => format!("{} went offline", name),
        },
        (_, BadgeState::Online) => format!("{} is back online", name),
        (_, BadgeState::Unknown) => format!("{} status unknown", name),
    };
    Some(message)
}

// Notification helpers
fn notify_offline(message: &str) {
    let _ = notify_rust::Notification::new()
        .summary("labwatch")
        .body(message)
        .icon("network-offline")
        .urgency(notify_rust::Urgency::Normal)
        .show();
}

fn notify_online(message: &str) {
    let _ = notify_rust::Notification::new()
        .summary("labwatch")
        .body(message)
        .icon("network-idle")
        .show();
}
