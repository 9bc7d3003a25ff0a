use serde::{Deserialize, Serialize};

/// What the worker does when a task panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicPolicy {
    /// Catch the panic, log it, and keep draining the queue.
    #[default]
    CatchAndLog,
    /// Stop the queue, drop everything pending, and let the panic end the
    /// worker thread.
    Propagate,
}

/// Dispatch queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Worker thread name. Only used for diagnostics.
    #[serde(default = "default_name")]
    pub name: String,
    /// Requested scheduling priority relative to the spawning thread.
    /// Recorded and reported, not applied to the OS thread.
    #[serde(default)]
    pub priority_offset: i32,
    #[serde(default)]
    pub panic_policy: PanicPolicy,
    /// Run every task inside a `TaskContext` for this queue and drain the
    /// tasks it defers before moving on.
    #[serde(default = "default_establish_context")]
    pub establish_context: bool,
}

fn default_name() -> String {
    "dispatch-queue".to_string()
}

fn default_establish_context() -> bool {
    true
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            priority_offset: 0,
            panic_policy: PanicPolicy::default(),
            establish_context: default_establish_context(),
        }
    }
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_priority_offset(mut self, offset: i32) -> Self {
        self.priority_offset = offset;
        self
    }

    pub fn with_panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.panic_policy = policy;
        self
    }

    pub fn with_context(mut self, establish: bool) -> Self {
        self.establish_context = establish;
        self
    }
}
