use tokio::sync::broadcast;

const DEFAULT_BUS_CAPACITY: usize = 1024;

/// A raw published message: channel name plus serialized payload.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// The process-wide upstream pub/sub. Publishing is always cheap and never
/// depends on subscriber state; consumers take a raw feed and filter.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<BusMessage>,
}

impl Bus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to a channel. Returns the number of live feeds; publishing
    /// with nobody listening is not an error.
    pub fn publish(&self, channel: &str, payload: String) -> usize {
        self.tx
            .send(BusMessage {
                channel: channel.to_string(),
                payload,
            })
            .unwrap_or(0)
    }

    /// A feed of every message published after this call.
    pub fn subscribe_raw(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
