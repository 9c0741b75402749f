//! Database configuration.

/// Configuration for a [`crate::Database`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Per-subscriber change stream buffer capacity. When a subscriber
    /// falls behind, the oldest buffered notification is discarded.
    pub change_stream_capacity: usize,
    /// Emit a warning when a full collection scan examines more than this
    /// many documents.
    pub scan_warning_threshold: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            change_stream_capacity: 1024,
            scan_warning_threshold: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = DatabaseConfig::default();
        assert_eq!(config.change_stream_capacity, 1024);
        assert_eq!(config.scan_warning_threshold, 1000);
    }
}
