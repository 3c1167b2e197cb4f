use std::time::Duration;

/// Tuning of the coordination loop and its queues.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Period of the logical clock fed to the consensus engine.
    pub tick_interval: Duration,
    /// Capacity of the inbound protocol message queue shared by all peers.
    pub inbound_queue_size: usize,
    /// Capacity of the task hand-off queue. The pipeline still applies one
    /// task at a time.
    pub task_queue_size: usize,
    /// Ticks without a leader before the standalone engine campaigns.
    pub election_ticks: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            inbound_queue_size: 1024,
            task_queue_size: 1,
            election_ticks: 10,
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_inbound_queue_size(mut self, size: usize) -> Self {
        self.inbound_queue_size = size;
        self
    }

    pub fn with_task_queue_size(mut self, size: usize) -> Self {
        self.task_queue_size = size;
        self
    }

    pub fn with_election_ticks(mut self, ticks: usize) -> Self {
        self.election_ticks = ticks;
        self
    }
}
