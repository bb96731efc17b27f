//! Session factory configuration.

use std::time::Duration;

/// When pending changes are written to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Flush on commit, explicit flush, and before queries touching dirty tables.
    #[default]
    Auto,
    /// Flush only on commit or explicit flush.
    Commit,
}

/// Options fixed when the session factory is built.
#[derive(Debug, Clone)]
pub struct SessionFactoryOptions {
    /// Consult and populate the second-level cache.
    pub second_level_cache: bool,

    /// Collect statistics counters.
    pub statistics: bool,

    /// Maximum number of interpreted queries kept. Zero disables the cache.
    pub query_cache_size: usize,

    pub flush_mode: FlushMode,

    /// How long SQLite waits on a locked database before failing a statement.
    pub busy_timeout: Duration,

    /// Log every rendered SQL statement at info level.
    pub log_sql: bool,
}

impl Default for SessionFactoryOptions {
    fn default() -> Self {
        Self {
            second_level_cache: true,
            statistics: true,
            query_cache_size: 256,
            flush_mode: FlushMode::Auto,
            busy_timeout: Duration::from_secs(5),
            log_sql: false,
        }
    }
}

impl SessionFactoryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_second_level_cache(mut self, enabled: bool) -> Self {
        self.second_level_cache = enabled;
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.statistics = enabled;
        self
    }

    pub fn with_query_cache_size(mut self, size: usize) -> Self {
        self.query_cache_size = size;
        self
    }

    pub fn with_flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_log_sql(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = SessionFactoryOptions::default();
        assert!(options.second_level_cache);
        assert_eq!(options.flush_mode, FlushMode::Auto);
        assert_eq!(options.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builder_overrides() {
        let options = SessionFactoryOptions::new()
            .with_second_level_cache(false)
            .with_flush_mode(FlushMode::Commit)
            .with_query_cache_size(0)
            .with_log_sql(true);
        assert!(!options.second_level_cache);
        assert_eq!(options.flush_mode, FlushMode::Commit);
        assert_eq!(options.query_cache_size, 0);
        assert!(options.log_sql);
    }
}
