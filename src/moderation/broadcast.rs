//! "Refresh mute overrides for guild G" requests
//!
//! Any part of the bot can publish a refresh. Every listener receives it, and
//! only the process that holds the guild in its cache ends up doing work.

use crate::MODERATION_TARGET;
use crate::moderation::LifecycleCoordinator;
use serenity::all::GuildId;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CAPACITY: usize = 64;

/// Publish/subscribe channel for override refreshes
#[derive(Clone)]
pub struct RefreshBus {
    tx: broadcast::Sender<GuildId>,
}

impl Default for RefreshBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    /// Ask every listener to refresh `guild_id`; returns how many listeners got it
    pub fn publish(&self, guild_id: GuildId) -> usize {
        self.tx.send(guild_id).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GuildId> {
        self.tx.subscribe()
    }

    /// Run refreshes for published guilds until the bus is dropped
    pub fn spawn_listener(&self, coordinator: Arc<LifecycleCoordinator>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(guild_id) => {
                        if let Some(report) = coordinator.refresh_mute_overrides(guild_id).await {
                            info!(
                                target: MODERATION_TARGET,
                                guild_id = %guild_id,
                                channels = report.channels,
                                updated = report.updated,
                                failed = report.failed,
                                "Mute overrides refreshed"
                            );
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: MODERATION_TARGET, skipped, "Refresh listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = RefreshBus::new();
        assert_eq!(bus.publish(GuildId::new(1)), 0);

        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.publish(GuildId::new(2)), 2);
        assert_eq!(a.recv().await.unwrap(), GuildId::new(2));
        assert_eq!(b.recv().await.unwrap(), GuildId::new(2));
    }
}
