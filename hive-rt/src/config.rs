use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;

bitflags::bitflags! {
    /// Selects which steps of the worker run loop are active for a group.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GroupCapabilities: u32 {
        /// Timed tick cadence instead of blocking until work arrives.
        const ACTIVE                 = 1 << 0;
        /// Drain the group's generic task inbox each iteration.
        const HANDLES_TASKS          = 1 << 1;
        /// Participate in AOD dispatch (workers may drain AOD objects).
        const SUPPORTS_AOD           = 1 << 2;
        /// Advance the per-worker delayed-task heap each iteration.
        const HANDLES_TIMER_TASKS    = 1 << 3;
        /// Walk the group's TLS-sync ring each iteration.
        const SUPPORTS_TLS_SYNC      = 1 << 4;
        /// Use per-thread slab allocator caches.
        const THREAD_LOCAL_ALLOCATOR = 1 << 5;
        /// Invoke the user-supplied tick callback each iteration.
        const CALL_TICK_HANDLER      = 1 << 6;
        /// Invoke each registered worker-service's per-tick hook.
        const TICK_WORKER_SERVICES   = 1 << 7;
    }
}

/// Per-tick callback signature, invoked for every worker in a group that
/// sets `CALL_TICK_HANDLER`.
pub type WorkerTickFn = Arc<dyn Fn(u32, usize) + Send + Sync>;

/// Configuration for one worker group, validated by
/// [`ServerConfig::add_worker_group`].
pub struct WorkerGroupConfig {
    pub id: u32,
    pub name: String,
    pub workers_count: usize,
    pub tick_rate_hz: u32,
    pub tls_sync_tick_rate_hz: u32,
    pub capabilities: GroupCapabilities,
    pub captures_calling_thread: bool,
    pub tls_sync_ring_capacity: usize,
    pub(crate) on_worker_tick: Option<WorkerTickFn>,
}

impl WorkerGroupConfig {
    pub fn new(id: u32, name: impl Into<String>, workers_count: usize) -> Self {
        Self {
            id,
            name: name.into(),
            workers_count,
            tick_rate_hz: 0,
            tls_sync_tick_rate_hz: 0,
            capabilities: GroupCapabilities::ACTIVE | GroupCapabilities::HANDLES_TASKS,
            captures_calling_thread: false,
            tls_sync_ring_capacity: 4096,
            on_worker_tick: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: GroupCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_tick_rate_hz(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    pub fn with_tls_sync_tick_rate_hz(mut self, hz: u32) -> Self {
        self.tls_sync_tick_rate_hz = hz;
        self
    }

    pub fn captures_calling_thread(mut self, yes: bool) -> Self {
        self.captures_calling_thread = yes;
        self
    }

    pub fn on_worker_tick<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, usize) + Send + Sync + 'static,
    {
        self.on_worker_tick = Some(Arc::new(f));
        self.capabilities |= GroupCapabilities::CALL_TICK_HANDLER;
        self
    }

    /// `None` when the group is reactive (tick rate 0): the worker blocks
    /// on new work instead of sleeping on a cadence.
    pub fn tick_period(&self) -> Option<Duration> {
        if self.tick_rate_hz == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64))
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers_count == 0 {
            return Err(ConfigError::ZeroWorkers { id: self.id });
        }
        if !self.tls_sync_ring_capacity.is_power_of_two() {
            return Err(ConfigError::TlsRingNotPowerOfTwo {
                capacity: self.tls_sync_ring_capacity,
            });
        }
        Ok(())
    }
}

/// Top-level server configuration: an ordered list of worker groups.
pub struct ServerConfig {
    pub name: String,
    pub(crate) groups: Vec<WorkerGroupConfig>,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    pub fn add_worker_group(mut self, group: WorkerGroupConfig) -> Self {
        self.groups.push(group);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::NoWorkerGroups);
        }

        let mut seen_ids = std::collections::HashSet::new();
        let mut capturing_groups = 0;
        for group in &self.groups {
            group.validate()?;
            if !seen_ids.insert(group.id) {
                return Err(ConfigError::DuplicateGroupId { id: group.id });
            }
            if group.captures_calling_thread {
                capturing_groups += 1;
            }
        }
        if capturing_groups > 1 {
            return Err(ConfigError::MultipleCapturingGroups);
        }
        Ok(())
    }
}
