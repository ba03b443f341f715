use std::future::Future;
use std::pin::Pin;

use super::{Event, EventSink};

/// Best-effort terminal sink for structured events.
///
/// Intentionally independent of `tracing`'s subscriber machinery: it prints
/// one JSON line per event directly, so it works even before a `tracing`
/// subscriber has been installed.
pub struct TerminalEventSink;

impl TerminalEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for TerminalEventSink {
    fn write<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match serde_json::to_string(event) {
                Ok(line) => eprintln!("{line}"),
                Err(err) => eprintln!("{{\"event\":\"event_serialize_error\",\"error\":\"{err}\"}}"),
            }
        })
    }
}
