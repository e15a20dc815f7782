use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::bus::{Bus, BusMessage};
use crate::event::{channel_name, pattern_for, pattern_matches, Event};

/// Capacity of each subscriber's event queue. A subscriber that lets this
/// fill gets dropped rather than wedging the fan-out.
pub const SUBSCRIBER_BUFFER: usize = 8;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("failed to serialize event payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

enum StreamRequest {
    Follow {
        pattern: String,
        subscriber: mpsc::Sender<Event>,
    },
}

/// Multiplexes any number of local subscribers onto pattern subscriptions
/// against the bus. A single background task owns the upstream feed and the
/// subscriber table; handles talk to it only through a request channel, so
/// upstream access stays serialized.
#[derive(Clone)]
pub struct EventStream {
    bus: Bus,
    requests: mpsc::Sender<StreamRequest>,
}

impl EventStream {
    pub fn new(bus: Bus) -> Self {
        let (requests, request_rx) = mpsc::channel(32);
        let upstream = bus.subscribe_raw();
        tokio::spawn(listen(upstream, request_rx));
        Self { bus, requests }
    }

    /// Publish a data store event. The payload is serialized once; local
    /// subscriber state can never fail an announce.
    pub fn announce<T: Serialize>(&self, event_id: &str, payload: &T) -> Result<(), StreamError> {
        let json = serde_json::to_string(payload)?;
        self.bus.publish(&channel_name(event_id), json);
        Ok(())
    }

    /// A bounded queue that will receive every event whose channel matches
    /// `notification-<prefix>*`. The first subscriber of a pattern installs
    /// it; later subscribers piggy-back on the existing subscription.
    pub async fn event_channel(&self, prefix: &str) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let request = StreamRequest::Follow {
            pattern: pattern_for(prefix),
            subscriber: tx,
        };
        if self.requests.send(request).await.is_err() {
            tracing::error!("event stream task is gone; subscription dropped");
        }
        rx
    }
}

async fn listen(
    mut upstream: broadcast::Receiver<BusMessage>,
    mut requests: mpsc::Receiver<StreamRequest>,
) {
    let mut subscribers: HashMap<String, Vec<mpsc::Sender<Event>>> = HashMap::new();

    loop {
        tokio::select! {
            request = requests.recv() => {
                match request {
                    Some(StreamRequest::Follow { pattern, subscriber }) => {
                        let list = subscribers.entry(pattern.clone()).or_default();
                        if list.is_empty() {
                            tracing::debug!(%pattern, "following pattern");
                        }
                        list.push(subscriber);
                    }
                    // Every handle dropped; nobody can subscribe again.
                    None => return,
                }
            }
            raw = upstream.recv() => {
                match raw {
                    Ok(message) => fan_out(&mut subscribers, &message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event stream lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

fn fan_out(subscribers: &mut HashMap<String, Vec<mpsc::Sender<Event>>>, message: &BusMessage) {
    let mut emptied = Vec::new();

    for (pattern, list) in subscribers.iter_mut() {
        if !pattern_matches(pattern, &message.channel) {
            continue;
        }
        let event = Event::parse(&message.channel, &message.payload);
        list.retain(|subscriber| match subscriber.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                // A full queue means a wedged reader. Drop it; never block.
                tracing::debug!(%pattern, "dropping unresponsive subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if list.is_empty() {
            emptied.push(pattern.clone());
        }
    }

    for pattern in emptied {
        subscribers.remove(&pattern);
        tracing::debug!(%pattern, "unsubscribed from idle pattern");
    }
}
