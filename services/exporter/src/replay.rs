//! Feeds a saved flow dump through the hook handler.

use flow_record::{tnetstring, FlowValue, TnetstringError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

use crate::hooks::{FlowHook, FlowHookHandler};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read flow dump: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub responses: usize,
    pub errors: usize,
    pub websockets: usize,
    /// Bytes left unparsed after a malformed flow.
    pub skipped_bytes: usize,
}

impl ReplaySummary {
    pub fn total(&self) -> usize {
        self.responses + self.errors + self.websockets
    }

    fn record(&mut self, handler: &FlowHookHandler, record: FlowValue) {
        let hook = FlowHook::classify(&record);
        debug!(%hook, "replaying flow");
        match hook {
            FlowHook::Response => {
                self.responses += 1;
                handler.response(record);
            }
            FlowHook::Error => {
                self.errors += 1;
                handler.error(record);
            }
            FlowHook::WebsocketEnd => {
                self.websockets += 1;
                handler.websocket_end(record);
            }
        }
    }

    fn stop(&mut self, err: &TnetstringError, offset: usize, skipped_bytes: usize) {
        warn!(error = %err, offset, "stopping replay at malformed flow");
        self.skipped_bytes = skipped_bytes;
    }

    fn log(&self) {
        info!(
            flows = self.total(),
            responses = self.responses,
            errors = self.errors,
            websockets = self.websockets,
            "flow dump replayed"
        );
    }
}

/// Decodes every flow in `input` and dispatches it through `handler`.
/// A malformed flow stops the replay; the flows before it are kept.
pub fn replay_bytes(input: &[u8], handler: &FlowHookHandler) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    let mut remaining = skip_whitespace(input);

    while !remaining.is_empty() {
        match tnetstring::parse(remaining) {
            Ok((record, rest)) => {
                summary.record(handler, record);
                remaining = skip_whitespace(rest);
            }
            Err(err) => {
                summary.stop(&err, input.len() - remaining.len(), remaining.len());
                break;
            }
        }
    }

    summary.log();
    summary
}

fn skip_whitespace(input: &[u8]) -> &[u8] {
    &input[leading_whitespace(input)..]
}

fn leading_whitespace(input: &[u8]) -> usize {
    input
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(input.len())
}

/// Streams flows from `reader`, dispatching each one as soon as its
/// tnetstring is complete. Only the flow being assembled is buffered.
pub async fn replay_reader<R>(
    reader: R,
    handler: &FlowHookHandler,
) -> Result<ReplaySummary, ReplayError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut summary = ReplaySummary::default();
    let mut pending: Vec<u8> = Vec::new();
    let mut offset = 0;

    loop {
        let blank = leading_whitespace(&pending);
        pending.drain(..blank);
        offset += blank;

        let failure = match tnetstring::frame_len(&pending) {
            Ok(Some(len)) => match tnetstring::parse(&pending[..len]).map(|(record, _)| record) {
                Ok(record) => {
                    summary.record(handler, record);
                    pending.drain(..len);
                    offset += len;
                    continue;
                }
                Err(err) => Some(err),
            },
            Ok(None) => None,
            Err(err) => Some(err),
        };

        if let Some(err) = failure {
            let unread = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
            let skipped = pending
                .len()
                .saturating_add(usize::try_from(unread).unwrap_or(usize::MAX));
            summary.stop(&err, offset, skipped);
            break;
        }

        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            if !pending.is_empty() {
                summary.stop(&TnetstringError::Truncated, offset, pending.len());
            }
            break;
        }
        let read = chunk.len();
        pending.extend_from_slice(chunk);
        reader.consume(read);
    }

    summary.log();
    Ok(summary)
}
