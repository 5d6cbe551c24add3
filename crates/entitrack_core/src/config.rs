//! Tracking configuration.

/// When dependent changes triggered by a principal are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CascadeTiming {
    /// Applied as part of the state change that triggers them.
    #[default]
    Immediate,
    /// Deferred until [`Context::save_changes`](crate::Context::save_changes).
    OnSaveChanges,
    /// Never applied by the tracker.
    Never,
}

/// Configuration for a tracking context.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// When dependents of a deleted principal are cascaded.
    pub cascade_delete_timing: CascadeTiming,

    /// When dependents severed from a required relationship are deleted.
    pub delete_orphans_timing: CascadeTiming,

    /// Whether change detection runs before enumerating entries, checking
    /// for changes and saving.
    pub auto_detect_changes: bool,

    /// Whether key values may appear in log fields and error messages.
    pub sensitive_data_logging: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            cascade_delete_timing: CascadeTiming::Immediate,
            delete_orphans_timing: CascadeTiming::Immediate,
            auto_detect_changes: true,
            sensitive_data_logging: false,
        }
    }
}

impl TrackingConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
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

    /// Sets whether change detection runs automatically.
    #[must_use]
    pub const fn auto_detect_changes(mut self, value: bool) -> Self {
        self.auto_detect_changes = value;
        self
    }

    /// Sets whether key values may be logged.
    #[must_use]
    pub const fn sensitive_data_logging(mut self, value: bool) -> Self {
        self.sensitive_data_logging = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TrackingConfig::default();
        assert_eq!(config.cascade_delete_timing, CascadeTiming::Immediate);
        assert_eq!(config.delete_orphans_timing, CascadeTiming::Immediate);
        assert!(config.auto_detect_changes);
        assert!(!config.sensitive_data_logging);
    }

    #[test]
    fn builder_pattern() {
        let config = TrackingConfig::new()
            .cascade_delete_timing(CascadeTiming::OnSaveChanges)
            .delete_orphans_timing(CascadeTiming::Never)
            .auto_detect_changes(false)
            .sensitive_data_logging(true);

        assert_eq!(config.cascade_delete_timing, CascadeTiming::OnSaveChanges);
        assert_eq!(config.delete_orphans_timing, CascadeTiming::Never);
        assert!(!config.auto_detect_changes);
        assert!(config.sensitive_data_logging);
    }
}
