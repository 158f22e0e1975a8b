//! Session configuration.

/// When the tracker applies cascade deletes or deletes orphans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeTiming {
    /// As soon as the principal is deleted or the dependent is severed.
    Immediate,
    /// During `save_changes`, before the batch is built.
    OnSaveChanges,
    /// Never automatically; only through an explicit `cascade_changes`.
    Never,
}

/// How changes made directly to entity objects are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeTrackingStrategy {
    /// Snapshot comparison in `detect_changes`.
    Snapshot,
    /// Every write through the session runs detection for the written
    /// entity immediately.
    ChangedNotifications,
}

/// Configuration for a change-tracking session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether `save_changes`, `has_changes` and entry access run
    /// `detect_changes` first.
    pub auto_detect_changes: bool,

    /// How direct object writes are discovered.
    pub change_tracking: ChangeTrackingStrategy,

    /// When deleting a principal cascades to its tracked dependents.
    pub cascade_delete_timing: CascadeTiming,

    /// When dependents severed from a required cascading relationship are
    /// deleted.
    pub delete_orphans_timing: CascadeTiming,

    /// Whether cascades reach dependents that exist only in the store.
    pub cascade_in_store: bool,

    /// First temporary value handed out for store-generated integer keys.
    /// Later values count down from here.
    pub temporary_key_seed: i64,

    /// Number of tracker events kept for polling.
    pub event_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_detect_changes: true,
            change_tracking: ChangeTrackingStrategy::Snapshot,
            cascade_delete_timing: CascadeTiming::OnSaveChanges,
            delete_orphans_timing: CascadeTiming::OnSaveChanges,
            cascade_in_store: true,
            temporary_key_seed: i64::from(i32::MIN) + 1000,
            event_history: 1024,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether changes are detected automatically.
    #[must_use]
    pub const fn auto_detect_changes(mut self, value: bool) -> Self {
        self.auto_detect_changes = value;
        self
    }

    /// Sets the change tracking strategy.
    #[must_use]
    pub const fn change_tracking(mut self, strategy: ChangeTrackingStrategy) -> Self {
        self.change_tracking = strategy;
        self
    }

    /// Sets the cascade delete timing.
    #[must_use]
    pub const fn cascade_delete_timing(mut self, timing: CascadeTiming) -> Self {
        self.cascade_delete_timing = timing;
        self
    }

    /// Sets the orphan deletion timing.
    #[must_use]
    pub const fn delete_orphans_timing(mut self, timing: CascadeTiming) -> Self {
        self.delete_orphans_timing = timing;
        self
    }

    /// Sets whether cascades query the store for untracked dependents.
    #[must_use]
    pub const fn cascade_in_store(mut self, value: bool) -> Self {
        self.cascade_in_store = value;
        self
    }

    /// Sets the first temporary key value.
    #[must_use]
    pub const fn temporary_key_seed(mut self, seed: i64) -> Self {
        self.temporary_key_seed = seed;
        self
    }

    /// Sets the event history size.
    #[must_use]
    pub const fn event_history(mut self, size: usize) -> Self {
        self.event_history = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.auto_detect_changes);
        assert_eq!(config.cascade_delete_timing, CascadeTiming::OnSaveChanges);
        assert_eq!(config.delete_orphans_timing, CascadeTiming::OnSaveChanges);
        assert_eq!(config.temporary_key_seed, -2_147_482_648);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .cascade_delete_timing(CascadeTiming::Immediate)
            .change_tracking(ChangeTrackingStrategy::ChangedNotifications)
            .temporary_key_seed(-78);

        assert_eq!(config.cascade_delete_timing, CascadeTiming::Immediate);
        assert_eq!(config.change_tracking, ChangeTrackingStrategy::ChangedNotifications);
        assert_eq!(config.temporary_key_seed, -78);
    }
}
