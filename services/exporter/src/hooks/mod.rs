mod handler;

use std::fmt;

use flow_record::FlowValue;

pub use handler::FlowHookHandler;

/// The producer callback a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowHook {
    /// A request/response pair completed.
    Response,
    /// The flow ended with an error.
    Error,
    /// A websocket session closed; the record carries every message.
    WebsocketEnd,
}

impl FlowHook {
    /// Picks the hook a finished flow would have been reported through.
    pub fn classify(record: &FlowValue) -> Self {
        let present = |key: &str| record.get(key).is_some_and(FlowValue::is_truthy);

        if present("error") {
            FlowHook::Error
        } else if present("messages") {
            FlowHook::WebsocketEnd
        } else {
            FlowHook::Response
        }
    }
}

impl fmt::Display for FlowHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowHook::Response => "response",
            FlowHook::Error => "error",
            FlowHook::WebsocketEnd => "websocket_end",
        };
        write!(f, "{name}")
    }
}
