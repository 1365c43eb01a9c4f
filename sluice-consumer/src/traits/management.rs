use std::fmt;

/// Events published to the management layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A non-browsing consumer has closed.
    ConsumerClosed {
        address: String,
        cluster_name: String,
        routing_name: String,
        filter: Option<String>,
        distance: u32,
        /// Consumers left on the queue after this one detached.
        consumer_count: usize,
    },
}

pub trait ManagementService: Send + Sync + fmt::Debug {
    /// # Errors
    /// If the notification cannot be published
    fn send_notification(&self, notification: Notification) -> anyhow::Result<()>;
}
