use std::time::Duration;

/// Tuning knobs shared by all request-scoped services.
#[derive(Debug, Clone)]
pub struct InspectorConfig {
    /// Budget of a single request. Every fan-out started by a request shares this deadline.
    pub request_timeout: Duration,

    /// How long a partition scan waits for the next record before it considers itself caught up.
    pub read_timeout: Duration,

    /// How long to keep waiting for tasks once the deadline passed before abandoning them.
    pub join_grace: Duration,

    /// Timeout of a broker liveness probe.
    pub probe_timeout: Duration,

    /// Record limit used when the caller does not give one.
    pub default_limit: usize,

    /// Upper bound for caller supplied record limits.
    pub max_limit: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            // same as rdkafka's `fetch.wait.max.ms`
            read_timeout: Duration::from_millis(500),
            join_grace: Duration::from_millis(50),
            probe_timeout: Duration::from_secs(1),
            default_limit: 100,
            max_limit: 10_000,
        }
    }
}

impl InspectorConfig {
    pub fn with_request_timeout(self, request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            ..self
        }
    }

    pub fn with_read_timeout(self, read_timeout: Duration) -> Self {
        Self {
            read_timeout,
            ..self
        }
    }

    pub fn with_join_grace(self, join_grace: Duration) -> Self {
        Self { join_grace, ..self }
    }

    pub fn with_probe_timeout(self, probe_timeout: Duration) -> Self {
        Self {
            probe_timeout,
            ..self
        }
    }

    pub fn with_default_limit(self, default_limit: usize) -> Self {
        Self {
            default_limit,
            ..self
        }
    }

    pub fn with_max_limit(self, max_limit: usize) -> Self {
        Self { max_limit, ..self }
    }
}
