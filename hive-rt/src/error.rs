use thiserror::Error;

/// Rejected configuration, returned from `ServerConfig`/`WorkerGroupConfig`
/// validation. Never panics its way out of `ServerInstance::initialize` —
/// callers get a `Status::Fail` at the public boundary with this as the
/// logged reason.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("worker group {id} declares zero workers")]
    ZeroWorkers { id: u32 },

    #[error("worker group {id} has duplicate id (already used by another group in this config)")]
    DuplicateGroupId { id: u32 },

    #[error("server config has no worker groups")]
    NoWorkerGroups,

    #[error("more than one worker group set `captures_calling_thread`; only one may")]
    MultipleCapturingGroups,

    #[error("tls-sync ring capacity {capacity} is not a power of two")]
    TlsRingNotPowerOfTwo { capacity: usize },
}

/// Failure to spawn a worker's OS thread. Aborts the owning group's start
/// sequence; workers already spawned in that group are joined before the
/// error propagates.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("failed to spawn worker {worker_index} in group {group_id}: {source}")]
    ThreadSpawnFailed {
        group_id: u32,
        worker_index: usize,
        #[source]
        source: std::io::Error,
    },
}
