use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on waiting for a correlated response (None = wait forever)
    pub request_timeout: Option<Duration>,
    /// Capacity of the command and frame queues
    pub channel_capacity: usize,
    /// Identifier attached to pushed updates (None = random UUID)
    pub client_id: Option<String>,
    /// Issue `listPages` as soon as the client starts
    pub sync_pages_on_start: bool,
    /// Re-issue `listPages` on every `connect` event
    pub resync_on_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            channel_capacity: 256,
            client_id: None,
            sync_pages_on_start: true,
            resync_on_connect: false,
        }
    }
}

impl ClientConfig {
    /// Config for tests: short timeout, fixed client id.
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(2)),
            channel_capacity: 64,
            client_id: Some("test-client".to_string()),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}
