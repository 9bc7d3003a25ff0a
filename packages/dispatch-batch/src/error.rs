#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The proposed parent already has this batch somewhere in its chain.
    #[error("batch {batch} cannot enclose itself (through batch {parent})")]
    Cycle { batch: u64, parent: u64 },
}
