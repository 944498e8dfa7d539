pub mod config;
pub mod hooks;
pub mod pipeline;
pub mod replay;
pub mod sink;

pub use config::{Credentials, Destination, ExporterConfig, SinkConfig};
pub use hooks::{FlowHook, FlowHookHandler};
pub use pipeline::{DeliveryPipeline, PipelineError, PipelineState, PipelineStats};
pub use replay::{replay_bytes, replay_reader, ReplayError, ReplaySummary};
pub use sink::{build_sink, DeliverySink, FileSink, HttpSink, SinkError, SinkKind};
