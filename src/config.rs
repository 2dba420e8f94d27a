/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker thread count; 0 selects the CPU count.
    pub threads: usize,
    /// Bound of the work queue feeding the workers.
    pub queue_bound: usize,
    /// Detail-list cap of the notification collector; totals keep counting
    /// past it.
    pub notification_cap: usize,
    /// Per-line byte ceiling enforced by the built-in readers.
    pub max_line_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            queue_bound: 1024,
            notification_cap: 500,
            max_line_bytes: 1024 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.effective_threads() > 0);
        assert!(config.queue_bound > 0);
        assert!(config.notification_cap > 0);
        assert!(config.max_line_bytes > 0);
    }

    #[test]
    fn test_explicit_thread_count_wins() {
        let config = EngineConfig {
            threads: 3,
            ..Default::default()
        };
        assert_eq!(config.effective_threads(), 3);
    }
}
