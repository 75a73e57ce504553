//! Moderation system for Warden Daemon
//!
//! Mutes, bans, kicks, warnings and message cleanup, plus everything needed
//! to undo timed actions when they run out and to stay consistent with what
//! Discord reports back through gateway events.

pub mod broadcast;
pub mod clean;
mod coordinator;
mod error;
pub mod gate;
mod kv;
mod lock;
mod markers;
pub mod overrides;
mod record;
mod remote;
mod scheduler;
mod store;
#[cfg(test)]
pub mod testing;
mod unbans;
mod warnings;

pub use broadcast::RefreshBus;
pub use coordinator::{
    ExpiryOutcome, LifecycleCoordinator, MUTE_EXPIRED, MUTE_SKIP_THRESHOLD_SECS,
    ObservationOutcome, TIMED_BAN_EXPIRED,
};
pub use error::{GENERIC_FAILURE, ModerationError, ModerationResult};
pub use kv::{KeyValueStore, MemoryKv, TTL_MISSING};
pub use lock::{SubjectGuard, SubjectKey, SubjectLocks};
pub use markers::{ActionMarkerStore, MARKER_LIFETIME, MarkerKind, marker_key};
pub use overrides::RefreshReport;
pub use record::MuteRecord;
#[cfg(test)]
pub use remote::MockRemoteActions;
pub use remote::{
    ChannelSnapshot, MemberSnapshot, MessageSnapshot, ModlogAction, ModlogEntry, RemoteActions,
    RoleOverwrite, SerenityRemote,
};
pub use scheduler::{
    ActionKind, DEFAULT_BUFFER, ExpiryScheduler, ScheduleKey, ScheduledAction, TokioScheduler,
};
pub use store::{MemoryMuteRepository, MuteRecordRepository, MuteStore, muted_key};
pub use unbans::PendingUnbans;
pub use warnings::{Warning, WarningStore};
