use std::time::Duration;

/// Streaming and control-loop tuning shared by the session and controller.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Stream buffer size in bytes; bounds the storage read done inside one pull.
    pub buffer_capacity: usize,
    /// How often the control loop polls the tag reader and session.
    pub poll_interval: Duration,
}

impl Default for StreamConfig {
    /// 2 KiB blocks, 200 ms polling.
    fn default() -> Self {
        Self {
            buffer_capacity: 2048,
            poll_interval: Duration::from_millis(200),
        }
    }
}
