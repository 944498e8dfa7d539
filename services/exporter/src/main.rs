use std::sync::Arc;

use anyhow::{Context, Result};
use flow_record::{RecordNormalizer, RuleSet};
use flowdump_exporter::{
    build_sink, replay_reader, DeliveryPipeline, ExporterConfig, FlowHookHandler, ReplaySummary,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ExporterConfig::from_env()?;
    init_tracing(&config.log_level);
    config.validate()?;

    let sink_config = config.sink_config();
    info!(
        destination = %config.destination,
        workers = sink_config.workers,
        encode_content = sink_config.encode_content,
        basic_auth = sink_config.credentials.is_some(),
        "starting flowdump exporter"
    );

    let sink = build_sink(&sink_config).context("destination cannot receive documents")?;
    let normalizer = RecordNormalizer::new(RuleSet::standard(sink_config.encode_content));
    let pipeline = Arc::new(DeliveryPipeline::new(normalizer));
    pipeline.start(sink_config.workers, sink)?;

    let handler = FlowHookHandler::new(Arc::clone(&pipeline));
    let input = std::env::args().nth(1);

    tokio::select! {
        summary = replay(input.as_deref(), &handler) => {
            let summary = summary?;
            info!(flows = summary.total(), "flow dump submitted");
        }
        _ = shutdown_signal() => {
            warn!("interrupted; delivering flows already submitted");
        }
    }

    let stats = pipeline.shutdown().await?;
    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        dropped = stats.dropped,
        "flowdump exporter shutting down"
    );
    Ok(())
}

async fn replay(input: Option<&str>, handler: &FlowHookHandler) -> Result<ReplaySummary> {
    let summary = match input {
        Some(path) if path != "-" => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("unable to open flow dump {path}"))?;
            replay_reader(file, handler).await?
        }
        _ => replay_reader(tokio::io::stdin(), handler).await?,
    };
    Ok(summary)
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
