/// Errors surfaced when setting up a dispatch queue.
///
/// Dropped tasks are not errors: work submitted after `quit()` disappears
/// silently, and `run_sync` reports it only through its return value.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to spawn worker thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
