/// Diagnostic counters for one tier. Maintained with relaxed atomics; not
/// load-bearing for correctness, only observability.
#[derive(Debug, Clone, Copy)]
pub struct TierStats {
    pub block_size: usize,
    pub allocs: u64,
    pub deallocs: u64,
    pub os_allocs: u64,
    pub os_deallocs: u64,
}

#[derive(Debug, Clone)]
pub struct AllocStats {
    pub tiers: Vec<TierStats>,
}
