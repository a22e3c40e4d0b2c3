//! NDJSON event input and batching.
//!
//! Reads one event per line from any [`AsyncBufRead`], groups them into
//! batches and hands each batch to a handler. A batch is flushed when it
//! reaches `batch_size`, when no line arrived for `flush_interval`, at end of
//! input, and on cancellation.

use crate::config::InputConfig;
use crate::error::InputError;
use crate::event::Event;
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters for one input run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    pub events: usize,
    pub parse_errors: usize,
    pub batches: usize,
}

/// Parse a single input line. Blank lines yield `Ok(None)`.
///
/// # Errors
/// Returns [`InputError::InvalidJson`] for malformed lines.
pub fn parse_line(line: &[u8]) -> Result<Option<Event>, InputError> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Event::from_json_line(trimmed).map(Some)
}

/// Read events until end of input or cancellation.
///
/// Malformed lines are logged at warn and skipped. The pending batch is
/// always flushed before returning, including on a read error.
///
/// # Errors
/// Returns [`InputError::Io`] if the reader fails.
pub async fn run<R, F, Fut>(
    mut reader: R,
    config: &InputConfig,
    cancel: CancellationToken,
    mut on_batch: F,
) -> Result<InputStats, InputError>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(Vec<Event>) -> Fut,
    Fut: Future<Output = ()>,
{
    let batch_size = config.batch_size.max(1);
    let mut stats = InputStats::default();
    let mut batch: Vec<Event> = Vec::with_capacity(batch_size);
    // Partial lines survive a flush timeout: read_until appends to `line`.
    let mut line: Vec<u8> = Vec::new();

    let outcome = loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Input cancelled, flushing pending events");
                break Ok(());
            }
            result = tokio::time::timeout(config.flush_interval, reader.read_until(b'\n', &mut line)) => result,
        };

        match read {
            Err(_elapsed) => {
                if !batch.is_empty() {
                    debug!(events = batch.len(), "Flush interval elapsed");
                    flush(&mut batch, &mut stats, &mut on_batch).await;
                }
            }
            Ok(Err(e)) => break Err(InputError::Io(e)),
            Ok(Ok(read)) => {
                if !line.is_empty() {
                    accept_line(&line, &mut batch, &mut stats);
                    line.clear();
                }
                if read == 0 {
                    info!("End of input");
                    break Ok(());
                }
                if batch.len() >= batch_size {
                    flush(&mut batch, &mut stats, &mut on_batch).await;
                }
            }
        }
    };

    flush(&mut batch, &mut stats, &mut on_batch).await;
    info!(
        events = stats.events,
        parse_errors = stats.parse_errors,
        batches = stats.batches,
        "Input finished"
    );
    outcome.map(|()| stats)
}

fn accept_line(line: &[u8], batch: &mut Vec<Event>, stats: &mut InputStats) {
    match parse_line(line) {
        Ok(Some(event)) => {
            stats.events += 1;
            metrics::counter!("logmailer_events_received_total").increment(1);
            batch.push(event);
        }
        Ok(None) => {}
        Err(e) => {
            stats.parse_errors += 1;
            metrics::counter!("logmailer_input_parse_errors_total").increment(1);
            warn!(error = %e, "Skipping malformed input line");
        }
    }
}

async fn flush<F, Fut>(batch: &mut Vec<Event>, stats: &mut InputStats, on_batch: &mut F)
where
    F: FnMut(Vec<Event>) -> Fut,
    Fut: Future<Output = ()>,
{
    if batch.is_empty() {
        return;
    }
    stats.batches += 1;
    debug!(events = batch.len(), "Flushing batch");
    on_batch(std::mem::take(batch)).await;
}
