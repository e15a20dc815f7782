pub mod bus;
pub mod event;
pub mod stream;

pub use bus::{Bus, BusMessage};
pub use event::{channel_name, pattern_for, Event, EVENT_PREFIX};
pub use stream::{EventStream, StreamError, SUBSCRIBER_BUFFER};
