//! Delivery of pipeline output to the host.
//!
//! The pipeline publishes through exactly one `EventSink`. Delivery must not
//! block the worker loop: `ChannelSink` drops messages when its queue is full.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::track::Track;
use crate::Event;

/// One message to the host, serialized as `{"type": ..., "data": ...}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SinkMessage {
    Event(Event),
    Tracks(Vec<Track>),
    /// Simulation only: one `x y w h` line per track, display coordinates.
    Telemetry(String),
}

pub trait EventSink: Send + Sync {
    fn deliver(&self, message: SinkMessage);
}

impl<F> EventSink for F
where
    F: Fn(SinkMessage) + Send + Sync,
{
    fn deliver(&self, message: SinkMessage) {
        self(message)
    }
}

/// Bounded queue sink for a consumer thread.
pub struct ChannelSink {
    tx: Sender<SinkMessage>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Receiver<SinkMessage>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, message: SinkMessage) {
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::debug!("sink queue full, message dropped"),
            Err(TrySendError::Disconnected(_)) => log::debug!("sink consumer gone, message dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use std::sync::Mutex;

    #[test]
    fn message_wire_shape() {
        let msg = SinkMessage::Telemetry("10 20 30 40".into());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "telemetry");
        assert_eq!(json["data"], "10 20 30 40");

        let event = Event::new("zone", Severity::Info, "t", "d");
        let json = serde_json::to_value(SinkMessage::Event(event)).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["data"]["severity"], "info");
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (sink, rx) = ChannelSink::new(1);
        sink.deliver(SinkMessage::Telemetry("a".into()));
        sink.deliver(SinkMessage::Telemetry("b".into()));
        assert_eq!(rx.try_recv().unwrap(), SinkMessage::Telemetry("a".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |m: SinkMessage| seen.lock().unwrap().push(m);
        sink.deliver(SinkMessage::Tracks(Vec::new()));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
