/// Coarse status returned across the public API boundary. Library code
/// does not propagate `std::error::Error` trait objects here; leaf errors
/// (allocation, configuration, spawn) are `thiserror` types consumed
/// internally and folded into one of these variants at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Fail,
    AllocationFailed,
    Timeout,
    AlreadyPerformed,
    Pending,
    ExecutedSync,
    SystemTerminated,
    SystemFailure,
    ServerInstanceFinalized,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success | Status::ExecutedSync)
    }
}
