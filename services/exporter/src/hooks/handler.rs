use std::sync::Arc;

use flow_record::FlowValue;
use tracing::{instrument, warn};

use crate::pipeline::DeliveryPipeline;

use super::FlowHook;

/// Entry points invoked by the interceptor for every finished flow.
///
/// Each hook hands the record to the pipeline unmodified. Submission never
/// blocks; a record offered after shutdown began is logged and dropped.
#[derive(Clone)]
pub struct FlowHookHandler {
    pipeline: Arc<DeliveryPipeline>,
}

impl FlowHookHandler {
    pub fn new(pipeline: Arc<DeliveryPipeline>) -> Self {
        Self { pipeline }
    }

    /// A request/response pair completed.
    pub fn response(&self, record: FlowValue) {
        self.dispatch(FlowHook::Response, record);
    }

    /// The flow failed.
    pub fn error(&self, record: FlowValue) {
        self.dispatch(FlowHook::Error, record);
    }

    /// A websocket session ended; `record` holds the full message list.
    pub fn websocket_end(&self, record: FlowValue) {
        self.dispatch(FlowHook::WebsocketEnd, record);
    }

    #[instrument(skip(self, record))]
    pub fn dispatch(&self, hook: FlowHook, record: FlowValue) {
        if let Err(err) = self.pipeline.submit(hook, record) {
            warn!(error = %err, "record not accepted by delivery pipeline");
        }
    }
}
