use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use flow_record::{tnetstring, FlowValue, RecordNormalizer, RuleSet};
use flowdump_exporter::{DeliveryPipeline, DeliverySink, SinkError, SinkKind};
use serde_json::Value;

pub use flow_record;
pub use flowdump_exporter;
pub use serde_json;

/// A completed HTTP flow with headers, bodies, addresses and a TLS
/// certificate chain.
pub fn http_flow(seq: i64) -> FlowValue {
    let headers = |pairs: &[(&str, &str)]| {
        FlowValue::Seq(
            pairs
                .iter()
                .map(|(name, value)| {
                    FlowValue::seq([
                        FlowValue::bytes(name.as_bytes().to_vec()),
                        FlowValue::bytes(value.as_bytes().to_vec()),
                    ])
                })
                .collect(),
        )
    };

    FlowValue::map([
        ("id", FlowValue::Str(format!("flow-{seq}"))),
        ("type", FlowValue::from("http")),
        (
            "request",
            FlowValue::map([
                ("method", FlowValue::bytes(b"POST".to_vec())),
                ("path", FlowValue::bytes(format!("/api/items/{seq}").into_bytes())),
                (
                    "headers",
                    headers(&[
                        ("Host", "api.example.com"),
                        ("Content-Type", "application/json"),
                        ("Accept", "*/*"),
                    ]),
                ),
                ("content", FlowValue::bytes(br#"{"name":"widget","qty":3}"#.to_vec())),
                ("timestamp_start", FlowValue::Float(1700000000.125)),
                ("timestamp_end", FlowValue::Float(1700000000.25)),
            ]),
        ),
        (
            "response",
            FlowValue::map([
                ("status_code", FlowValue::Int(201)),
                ("headers", headers(&[("Server", "nginx"), ("Content-Length", "2")])),
                ("content", FlowValue::bytes(b"{}".to_vec())),
                ("timestamp_start", FlowValue::Float(1700000000.5)),
                ("timestamp_end", FlowValue::Float(1700000000.75)),
            ]),
        ),
        (
            "client_conn",
            FlowValue::map([
                (
                    "address",
                    FlowValue::seq([FlowValue::from("::ffff:10.0.0.7"), FlowValue::Int(51234)]),
                ),
                ("timestamp_start", FlowValue::Float(1700000000.0)),
                ("timestamp_tls_setup", FlowValue::Float(1700000000.0625)),
            ]),
        ),
        (
            "server_conn",
            FlowValue::map([
                (
                    "address",
                    FlowValue::seq([FlowValue::from("93.184.216.34"), FlowValue::Int(443)]),
                ),
                (
                    "ip_address",
                    FlowValue::seq([FlowValue::from("93.184.216.34"), FlowValue::Int(443)]),
                ),
                ("timestamp_tcp_setup", FlowValue::Float(1700000000.03125)),
                (
                    "certificate_list",
                    FlowValue::seq([FlowValue::bytes(vec![0x30, 0x82, 0x01, 0x0a])]),
                ),
            ]),
        ),
    ])
}

/// A closed websocket session carrying `messages` frames.
pub fn websocket_flow(messages: usize) -> FlowValue {
    let frames = (0..messages)
        .map(|i| {
            FlowValue::seq([
                FlowValue::from("text"),
                FlowValue::Bool(i % 2 == 0),
                FlowValue::bytes(format!("frame {i}").into_bytes()),
                FlowValue::Float(1700000000.0 + i as f64 / 8.0),
            ])
        })
        .collect();

    FlowValue::map([
        ("type", FlowValue::from("websocket")),
        ("messages", FlowValue::Seq(frames)),
        (
            "client_conn",
            FlowValue::map([(
                "address",
                FlowValue::seq([FlowValue::from("127.0.0.1"), FlowValue::Int(40000)]),
            )]),
        ),
    ])
}

/// A flow that failed before a response arrived.
pub fn error_flow() -> FlowValue {
    FlowValue::map([
        ("type", FlowValue::from("http")),
        (
            "error",
            FlowValue::map([
                ("msg", FlowValue::from("connection reset by peer")),
                ("timestamp", FlowValue::Float(1700000002.5)),
            ]),
        ),
    ])
}

/// `count` flows serialized back to back the way a flow dump stores them.
pub fn flow_dump(count: usize) -> Vec<u8> {
    let mut dump = Vec::new();
    for i in 0..count {
        let flow = match i % 3 {
            0 => http_flow(i as i64),
            1 => websocket_flow(4),
            _ => error_flow(),
        };
        dump.extend(tnetstring::encode(&flow));
    }
    dump
}

pub fn pipeline(encode_content: bool) -> Arc<DeliveryPipeline> {
    Arc::new(DeliveryPipeline::new(RecordNormalizer::new(
        RuleSet::standard(encode_content),
    )))
}

/// Sink that only counts the documents it receives.
#[derive(Default)]
pub struct CountingSink {
    delivered: AtomicU64,
}

impl CountingSink {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DeliverySink for CountingSink {
    fn kind(&self) -> SinkKind {
        SinkKind::File
    }

    async fn deliver(&self, document: &Value) -> Result<(), SinkError> {
        std::hint::black_box(document);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
