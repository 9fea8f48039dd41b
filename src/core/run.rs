//! Per-invocation run settings.

/// Immutable settings threaded through every orchestrator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Destination node (base URL)
    pub node: String,
    /// Source and destination are different installations
    pub transfer_mode: bool,
    /// Base widget edits are propagated to every instance
    pub update_instances: bool,
    /// Send `widgetInstanceMetadata.json` on put
    pub send_instance_config: bool,
    /// Upper bound on in-flight calls in any one fan-out
    pub concurrency: usize,
}

pub const DEFAULT_CONCURRENCY: usize = 4;

impl RunConfig {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            transfer_mode: false,
            update_instances: false,
            send_instance_config: true,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn transfer(mut self, on: bool) -> Self {
        self.transfer_mode = on;
        self
    }

    pub fn update_instances(mut self, on: bool) -> Self {
        self.update_instances = on;
        self
    }

    pub fn send_instance_config(mut self, on: bool) -> Self {
        self.send_instance_config = on;
        self
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }
}
