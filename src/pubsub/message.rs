//! Pub/Sub Messages
//!
//! Messages are queued per client and turned into RESP arrays by the
//! client's delivery task:
//!
//! ```text
//! ["subscribed", topic, <topics held>]
//! ["message",    topic, payload]
//! ```

use crate::protocol::RespValue;
use bytes::Bytes;
use std::fmt;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Confirmation of a subscription
    Subscribed,
    /// A payload published to a topic
    Published,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Subscribed => "subscribed",
            MessageKind::Published => "message",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One push for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub topic: Bytes,
    pub payload: RespValue,
    pub timestamp: SystemTime,
}

impl Message {
    /// Confirmation that the client now holds `active` subscriptions. The
    /// count is the third element of the push, as Redis clients expect.
    pub fn subscribed(topic: Bytes, active: usize) -> Self {
        Self {
            kind: MessageKind::Subscribed,
            topic,
            payload: RespValue::from(active),
            timestamp: SystemTime::now(),
        }
    }

    pub fn published(topic: Bytes, payload: Bytes) -> Self {
        Self {
            kind: MessageKind::Published,
            topic,
            payload: RespValue::BulkString(payload),
            timestamp: SystemTime::now(),
        }
    }

    /// The push frame written to the subscriber.
    pub fn to_resp(&self) -> RespValue {
        RespValue::array(vec![
            RespValue::bulk_string(self.kind.as_str()),
            RespValue::BulkString(self.topic.clone()),
            self.payload.clone(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_published_frame() {
        let msg = Message::published(Bytes::from("topicA"), Bytes::from("hello"));
        assert_eq!(
            msg.to_resp().serialize(),
            b"*3\r\n$7\r\nmessage\r\n$6\r\ntopicA\r\n$5\r\nhello\r\n"
        );
    }

    #[test]
    fn test_subscribed_frame() {
        let msg = Message::subscribed(Bytes::from("news"), 2);
        assert_eq!(
            msg.to_resp().serialize(),
            b"*3\r\n$10\r\nsubscribed\r\n$4\r\nnews\r\n:2\r\n"
        );
    }
}
