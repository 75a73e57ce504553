use std::{ops::Deref, sync::Arc, time::Duration};

use crate::config::{ConfigStore, Settings};
use crate::moderation::{
    ExpiryScheduler, LifecycleCoordinator, MemoryKv, MemoryMuteRepository, ModerationResult,
    PendingUnbans, RefreshBus, RemoteActions, WarningStore,
};
use crate::MODERATION_TARGET;
use poise::serenity_prelude as serenity;
use serenity::prelude::TypeMapKey;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("settings", &self.settings)
            .field("guild_configs", &self.configs.len())
            .field("mutes", &self.mutes.len())
            .field("warnings", &self.warnings.len())
            .field("pending_unbans", &self.unbans.len())
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Shared state of the bot
pub struct DataInner {
    pub settings: Settings,
    // Map of guild_id -> moderation configuration
    pub configs: Arc<ConfigStore>,
    // Active mute records
    pub mutes: MemoryMuteRepository,
    pub warnings: WarningStore,
    // Timed bans still to be lifted
    pub unbans: PendingUnbans,
    pub coordinator: Arc<LifecycleCoordinator>,
    // Mute override refresh requests
    pub refresh: RefreshBus,
}

impl Data {
    /// Wire the coordinator over already loaded state
    #[must_use]
    pub fn assemble(
        settings: Settings,
        configs: ConfigStore,
        mutes: MemoryMuteRepository,
        warnings: WarningStore,
        unbans: PendingUnbans,
        remote: Arc<dyn RemoteActions>,
        scheduler: Arc<dyn ExpiryScheduler>,
    ) -> Self {
        let configs = Arc::new(configs);
        let coordinator = Arc::new(LifecycleCoordinator::new(
            configs.clone(),
            remote,
            Arc::new(mutes.clone()),
            Arc::new(MemoryKv::new()),
            scheduler,
            warnings.clone(),
            unbans.clone(),
        ));

        Self(Arc::new(DataInner {
            settings,
            configs,
            mutes,
            warnings,
            unbans,
            coordinator,
            refresh: RefreshBus::new(),
        }))
    }

    /// Load the YAML snapshots under the data directory
    ///
    /// Missing or unreadable files give empty state.
    pub async fn load(
        settings: Settings,
        remote: Arc<dyn RemoteActions>,
        scheduler: Arc<dyn ExpiryScheduler>,
    ) -> Self {
        let configs = ConfigStore::load(&settings.guild_configs_path()).await;
        let mutes = MemoryMuteRepository::load(&settings.mutes_path()).await;
        let warnings = WarningStore::load(&settings.warnings_path()).await;
        let unbans = PendingUnbans::load(&settings.unbans_path()).await;
        info!(
            target: MODERATION_TARGET,
            guild_configs = configs.len(),
            mutes = mutes.len(),
            warnings = warnings.len(),
            pending_unbans = unbans.len(),
            "Loaded moderation state"
        );
        Self::assemble(settings, configs, mutes, warnings, unbans, remote, scheduler)
    }

    /// Save every snapshot
    ///
    /// # Errors
    /// This function will return an error if:
    /// - The data directory cannot be created
    /// - A snapshot cannot be serialized to YAML
    /// - A snapshot cannot be written
    pub async fn save(&self) -> ModerationResult<()> {
        self.configs.save(&self.settings.guild_configs_path()).await?;
        self.mutes.save(&self.settings.mutes_path()).await?;
        self.warnings.save(&self.settings.warnings_path()).await?;
        self.unbans.save(&self.settings.unbans_path()).await?;
        Ok(())
    }

    /// Save every `period` until the runtime shuts down
    pub fn spawn_autosave(&self, period: Duration) -> JoinHandle<()> {
        let data = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick fires immediately; nothing changed yet
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = data.save().await {
                    error!(target: MODERATION_TARGET, error = %e, "Autosave failed");
                }
            }
        })
    }
}
