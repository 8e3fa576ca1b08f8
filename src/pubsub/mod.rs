//! Publish/Subscribe
//!
//! Clients subscribe to topics; a `PUBLISH` fans a payload out to every
//! current subscriber of its topic. Pushes travel through a per-client
//! queue, so they never block the publisher on a slow socket beyond the
//! queue's capacity.

pub mod broker;
pub mod message;

pub use broker::{Broker, PubSubError, DEFAULT_QUEUE_CAPACITY};
pub use message::{Message, MessageKind};
