use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use flow_record::{tnetstring, FlowValue, RecordNormalizer, RuleSet};
use flowdump_exporter::{
    build_sink, replay_bytes, replay_reader, Credentials, DeliveryPipeline, DeliverySink, Destination,
    FlowHook, FlowHookHandler, PipelineError, PipelineState, SinkConfig, SinkError, SinkKind,
};
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::io::AsyncWriteExt;
use wiremock::matchers::{basic_auth, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Records every attempt; fails documents whose `seq` is in `fail_on`.
#[derive(Default)]
struct RecordingSink {
    attempts: Mutex<Vec<Value>>,
    fail_on: Vec<i64>,
    delay: Duration,
}

#[async_trait]
impl DeliverySink for RecordingSink {
    fn kind(&self) -> SinkKind {
        SinkKind::File
    }

    async fn deliver(&self, document: &Value) -> Result<(), SinkError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.attempts.lock().unwrap().push(document.clone());
        let seq = document["seq"].as_i64().unwrap_or_default();
        if self.fail_on.contains(&seq) {
            return Err(SinkError::Network(format!("refused {seq}")));
        }
        Ok(())
    }
}

impl RecordingSink {
    fn seqs(&self) -> Vec<i64> {
        let mut seqs: Vec<i64> = self
            .attempts
            .lock()
            .unwrap()
            .iter()
            .map(|doc| doc["seq"].as_i64().unwrap())
            .collect();
        seqs.sort_unstable();
        seqs
    }
}

fn numbered(seq: i64) -> FlowValue {
    FlowValue::map([
        ("seq", FlowValue::Int(seq)),
        (
            "request",
            FlowValue::map([("timestamp_start", FlowValue::Float(1700000000.5))]),
        ),
    ])
}

fn pipeline() -> Arc<DeliveryPipeline> {
    Arc::new(DeliveryPipeline::new(RecordNormalizer::new(RuleSet::standard(false))))
}

fn http_flow(path: &str) -> FlowValue {
    FlowValue::map([
        ("type", FlowValue::from("http")),
        (
            "request",
            FlowValue::map([
                ("method", FlowValue::bytes(b"GET".to_vec())),
                ("path", FlowValue::bytes(path.as_bytes().to_vec())),
                (
                    "headers",
                    FlowValue::Seq(vec![FlowValue::seq([
                        FlowValue::bytes(b"Host".to_vec()),
                        FlowValue::bytes(b"example.com".to_vec()),
                    ])]),
                ),
                ("content", FlowValue::bytes(b"ping".to_vec())),
                ("timestamp_start", FlowValue::Float(1700000000.5)),
            ]),
        ),
        (
            "client_conn",
            FlowValue::map([(
                "address",
                FlowValue::seq([FlowValue::from("::ffff:192.0.2.10"), FlowValue::Int(50000)]),
            )]),
        ),
    ])
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_waits_for_every_submission() -> Result<()> {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = pipeline();
    pipeline.start(4, sink.clone())?;

    for seq in 0..50 {
        pipeline.submit(FlowHook::Response, numbered(seq))?;
    }
    pipeline.drain().await?;

    assert_eq!(sink.seqs(), (0..50).collect::<Vec<_>>());
    let stats = pipeline.stats();
    assert_eq!(stats.submitted, 50);
    assert_eq!(stats.attempts(), 50);
    assert_eq!(stats.pending, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_delivery_does_not_stop_later_records() -> Result<()> {
    let sink = Arc::new(RecordingSink {
        fail_on: vec![2, 5],
        ..RecordingSink::default()
    });
    let pipeline = pipeline();
    pipeline.start(1, sink.clone())?;

    for seq in 0..10 {
        pipeline.submit(FlowHook::Response, numbered(seq))?;
    }
    pipeline.drain().await?;

    assert_eq!(sink.seqs(), (0..10).collect::<Vec<_>>());
    let stats = pipeline.stats();
    assert_eq!(stats.delivered, 8);
    assert_eq!(stats.failed, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn single_worker_preserves_submission_order() -> Result<()> {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = pipeline();
    pipeline.start(1, sink.clone())?;

    for seq in 0..20 {
        pipeline.submit(FlowHook::Response, numbered(seq))?;
    }
    pipeline.drain().await?;

    let order: Vec<i64> = sink
        .attempts
        .lock()
        .unwrap()
        .iter()
        .map(|doc| doc["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(order, (0..20).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_producers_lose_nothing() -> Result<()> {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = pipeline();
    pipeline.start(8, sink.clone())?;

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let handler = FlowHookHandler::new(Arc::clone(&pipeline));
            tokio::spawn(async move {
                for i in 0..250 {
                    handler.response(numbered(producer * 1000 + i));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await?;
    }

    let stats = pipeline.shutdown().await?;
    assert_eq!(stats.submitted, 1000);
    assert_eq!(stats.attempts(), 1000);
    assert_eq!(stats.pending, 0);

    let seqs = sink.seqs();
    let mut expected: Vec<i64> = (0..4)
        .flat_map(|producer| (0..250).map(move |i| producer * 1000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(seqs, expected);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn badly_shaped_field_is_delivered_untransformed() -> Result<()> {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = pipeline();
    pipeline.start(2, sink.clone())?;

    let mut odd = numbered(99);
    if let FlowValue::Map(fields) = &mut odd {
        fields.insert(
            "client_conn".to_string(),
            FlowValue::map([("address", FlowValue::from("nowhere"))]),
        );
    }
    pipeline.submit(FlowHook::Error, odd)?;
    pipeline.submit(FlowHook::Response, numbered(1))?;
    pipeline.drain().await?;

    assert_eq!(sink.seqs(), vec![1, 99]);
    let document = sink
        .attempts
        .lock()
        .unwrap()
        .iter()
        .find(|doc| doc["seq"] == json!(99))
        .cloned()
        .unwrap();
    assert_eq!(document["client_conn"]["address"], json!("nowhere"));
    assert_eq!(document["request"]["timestamp_start"], json!(1700000000500i64));

    let stats = pipeline.stats();
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.delivered, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unusable_record_is_dropped_and_pipeline_continues() -> Result<()> {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = pipeline();
    pipeline.start(2, sink.clone())?;

    pipeline.submit(FlowHook::Error, FlowValue::from("not a flow"))?;
    pipeline.submit(FlowHook::Response, numbered(1))?;
    pipeline.drain().await?;

    assert_eq!(sink.seqs(), vec![1]);
    let stats = pipeline.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.delivered, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_ignores_records_submitted_while_waiting() -> Result<()> {
    let sink = Arc::new(RecordingSink {
        delay: Duration::from_millis(50),
        ..RecordingSink::default()
    });
    let pipeline = pipeline();
    pipeline.start(4, sink.clone())?;
    pipeline.submit(FlowHook::Response, numbered(0))?;

    let producer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            for seq in 1..=60 {
                pipeline.submit(FlowHook::Response, numbered(seq))?;
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            Ok::<_, PipelineError>(())
        })
    };

    let started = Instant::now();
    pipeline.drain().await?;
    let waited = started.elapsed();

    assert!(sink.seqs().contains(&0));
    assert!(
        waited < Duration::from_millis(1000),
        "drain waited {waited:?} on records submitted after it began"
    );

    producer.await??;
    let stats = pipeline.shutdown().await?;
    assert_eq!(stats.delivered, 61);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn records_submitted_before_start_are_delivered() -> Result<()> {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = pipeline();

    pipeline.submit(FlowHook::Response, numbered(7))?;
    assert_eq!(
        pipeline.drain().await,
        Err(PipelineError::InvalidState(PipelineState::Idle, PipelineState::Running))
    );

    pipeline.start(1, sink.clone())?;
    pipeline.drain().await?;
    assert_eq!(sink.seqs(), vec![7]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_intake() -> Result<()> {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = pipeline();
    pipeline.start(2, sink.clone())?;
    pipeline.submit(FlowHook::WebsocketEnd, numbered(1))?;

    let stats = pipeline.shutdown().await?;
    assert_eq!(stats.attempts(), 1);
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    assert_eq!(
        pipeline.submit(FlowHook::Response, numbered(2)),
        Err(PipelineError::Closed(PipelineState::Stopped))
    );
    assert_eq!(
        pipeline.start(1, sink.clone()),
        Err(PipelineError::InvalidState(PipelineState::Stopped, PipelineState::Idle))
    );
    assert!(pipeline.shutdown().await.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_workers_is_rejected() {
    let pipeline = pipeline();
    let sink = Arc::new(RecordingSink::default());
    assert_eq!(pipeline.start(0, sink), Err(PipelineError::NoWorkers));
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn http_sink_posts_documents_with_basic_auth() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/flows/_doc"))
        .and(basic_auth("elastic", "changeme"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "type": "http",
            "request": {
                "method": "GET",
                "path": "/a",
                "headers": { "Host": "example.com" },
                "content": "cGluZw==",
                "timestamp_start": 1700000000500i64
            },
            "client_conn": {
                "address": { "host": "192.0.2.10", "port": 50000 }
            }
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let config = SinkConfig {
        destination: Destination::Http(format!("{}/flows/_doc", server.uri())),
        credentials: Some(Credentials {
            username: "elastic".to_string(),
            password: Some("changeme".to_string()),
        }),
        encode_content: true,
        request_timeout: Duration::from_secs(5),
        workers: 10,
    };
    let sink = build_sink(&config)?;
    assert_eq!(sink.kind(), SinkKind::Http);

    let pipeline = Arc::new(DeliveryPipeline::new(RecordNormalizer::new(
        RuleSet::standard(config.encode_content),
    )));
    pipeline.start(config.workers, sink)?;
    FlowHookHandler::new(Arc::clone(&pipeline)).response(http_flow("/a"));

    let stats = pipeline.shutdown().await?;
    assert_eq!(stats.delivered, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn http_errors_are_counted_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let config = SinkConfig {
        destination: Destination::Http(server.uri()),
        credentials: None,
        encode_content: false,
        request_timeout: Duration::from_secs(5),
        workers: 3,
    };
    let pipeline = pipeline();
    pipeline.start(config.workers, build_sink(&config)?)?;

    for path in ["/a", "/b", "/c"] {
        pipeline.submit(FlowHook::Response, http_flow(path))?;
    }
    let stats = pipeline.shutdown().await?;

    assert_eq!(stats.failed, 3);
    assert_eq!(stats.delivered, 0);
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_endpoint_is_a_delivery_failure() -> Result<()> {
    let config = SinkConfig {
        destination: Destination::Http("http://127.0.0.1:9/flows".to_string()),
        credentials: None,
        encode_content: false,
        request_timeout: Duration::from_secs(2),
        workers: 1,
    };
    let pipeline = pipeline();
    pipeline.start(config.workers, build_sink(&config)?)?;
    pipeline.submit(FlowHook::Error, numbered(1))?;

    let stats = pipeline.shutdown().await?;
    assert_eq!(stats.failed, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn replayed_dump_lands_in_file_sink() -> Result<()> {
    let dir = tempdir()?;
    let output = dir.path().join("flows.jsonl");
    let config = SinkConfig {
        destination: Destination::File(output.clone()),
        credentials: None,
        encode_content: false,
        request_timeout: Duration::from_secs(5),
        workers: 1,
    };

    let websocket = FlowValue::map([
        ("type", FlowValue::from("websocket")),
        (
            "messages",
            FlowValue::Seq(vec![FlowValue::seq([
                FlowValue::from("text"),
                FlowValue::Bool(true),
                FlowValue::bytes(b"hi".to_vec()),
                FlowValue::Float(1700000000.25),
            ])]),
        ),
    ]);
    let failed = FlowValue::map([
        ("type", FlowValue::from("http")),
        (
            "error",
            FlowValue::map([
                ("msg", FlowValue::from("connection refused")),
                ("timestamp", FlowValue::Float(1700000001.0)),
            ]),
        ),
    ]);

    let mut dump = Vec::new();
    dump.extend(tnetstring::encode(&http_flow("/index.html")));
    dump.extend(tnetstring::encode(&websocket));
    dump.extend(tnetstring::encode(&failed));
    dump.extend_from_slice(b"12:truncated");

    let pipeline = pipeline();
    pipeline.start(config.workers, build_sink(&config)?)?;
    let handler = FlowHookHandler::new(Arc::clone(&pipeline));

    let summary = replay_bytes(&dump, &handler);
    assert_eq!((summary.responses, summary.websockets, summary.errors), (1, 1, 1));
    assert_eq!(summary.skipped_bytes, b"12:truncated".len());

    let stats = pipeline.shutdown().await?;
    assert_eq!(stats.delivered, 3);

    let contents = std::fs::read_to_string(&output)?;
    let documents: Vec<Value> = contents
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(documents.len(), 3);

    assert_eq!(documents[0]["request"]["path"], json!("/index.html"));
    assert_eq!(documents[0]["client_conn"]["address"]["host"], json!("192.0.2.10"));
    assert_eq!(
        documents[1]["messages"],
        json!([{ "type": "text", "from_client": true, "timestamp": 1700000000250i64 }])
    );
    assert_eq!(documents[2]["error"]["timestamp"], json!(1700000001000i64));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_reader_dispatches_before_end_of_input() -> Result<()> {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = pipeline();
    pipeline.start(1, sink.clone())?;
    let handler = FlowHookHandler::new(Arc::clone(&pipeline));

    let (mut writer, reader) = tokio::io::duplex(64);
    let replay = tokio::spawn(async move { replay_reader(reader, &handler).await });

    let first = tnetstring::encode(&numbered(1));
    let (head, tail) = first.split_at(first.len() / 2);
    writer.write_all(head).await?;
    writer.write_all(tail).await?;
    writer.write_all(b"\n").await?;

    // The stream is still open here.
    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.seqs().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    writer.write_all(&tnetstring::encode(&numbered(2))).await?;
    writer.write_all(b"7:partial").await?;
    drop(writer);

    let summary = replay.await??;
    assert_eq!(summary.responses, 2);
    assert_eq!(summary.skipped_bytes, b"7:partial".len());

    pipeline.shutdown().await?;
    assert_eq!(sink.seqs(), vec![1, 2]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_reader_stops_at_malformed_flow() -> Result<()> {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = pipeline();
    pipeline.start(1, sink.clone())?;
    let handler = FlowHookHandler::new(Arc::clone(&pipeline));

    let mut dump = tnetstring::encode(&numbered(1));
    let tail = b"x:bad}5:after,".to_vec();
    dump.extend_from_slice(&tail);
    dump.extend(tnetstring::encode(&numbered(2)));
    let skipped = dump.len() - tnetstring::encode(&numbered(1)).len();

    let summary = replay_reader(dump.as_slice(), &handler).await?;
    assert_eq!(summary.total(), 1);
    assert_eq!(summary.skipped_bytes, skipped);

    pipeline.shutdown().await?;
    assert_eq!(sink.seqs(), vec![1]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_writers_keep_file_lines_whole() -> Result<()> {
    let dir = tempdir()?;
    let output = dir.path().join("flows.jsonl");
    let config = SinkConfig {
        destination: Destination::File(output.clone()),
        credentials: None,
        encode_content: false,
        request_timeout: Duration::from_secs(5),
        workers: 4,
    };
    let payload = "x".repeat(64 * 1024);

    // Two pipelines with independent sinks on the same file.
    let pipelines = [pipeline(), pipeline()];
    for pipeline in &pipelines {
        pipeline.start(config.workers, build_sink(&config)?)?;
    }
    for seq in 0..100 {
        let record = FlowValue::map([
            ("seq", FlowValue::Int(seq)),
            ("payload", FlowValue::from(payload.as_str())),
        ]);
        pipelines[(seq % 2) as usize].submit(FlowHook::Response, record)?;
    }
    for pipeline in &pipelines {
        assert_eq!(pipeline.shutdown().await?.delivered, 50);
    }

    let contents = std::fs::read_to_string(&output)?;
    let mut seen = BTreeSet::new();
    for line in contents.lines() {
        let document: Value = serde_json::from_str(line)?;
        assert_eq!(document["payload"].as_str().map(str::len), Some(payload.len()));
        seen.insert(document["seq"].as_i64().unwrap());
    }
    assert_eq!(contents.lines().count(), 100);
    assert_eq!(seen, (0..100).collect::<BTreeSet<_>>());
    Ok(())
}

#[tokio::test]
async fn unwritable_file_destination_is_fatal() {
    let dir = tempdir().unwrap();
    let config = SinkConfig {
        destination: Destination::File(dir.path().join("missing").join("flows.jsonl")),
        credentials: None,
        encode_content: false,
        request_timeout: Duration::from_secs(5),
        workers: 1,
    };

    assert!(matches!(build_sink(&config), Err(SinkError::Open { .. })));
}
