use super::{ChatChunk, CompletionChunk, FinalChatChunk};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use memchr::memchr;
use serde::Serialize;
use std::fmt::Display;
use std::io;
use tokio::sync::mpsc;

pub const SSE_DATA_PREFIX: &str = "data:";
pub const SSE_DONE: &str = "[DONE]";

/// Splits an arbitrary byte stream into `\n`-terminated lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line, without its terminator
    pub fn next_line(&mut self) -> Option<String> {
        let pos = memchr(b'\n', &self.buf)?;
        let line = String::from_utf8_lossy(&self.buf[..pos])
            .trim_end_matches('\r')
            .to_string();
        self.buf.drain(..=pos);
        Some(line)
    }

    /// Whatever is left once the stream has ended
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Ignore,
    Emit(ChatChunk),
    Finish(FinalChatChunk),
}

/// Maps one SSE line of a remote completion stream to at most one
/// local-dialect chunk
#[derive(Debug, Clone)]
pub struct SseTranscoder {
    model: String,
}

impl SseTranscoder {
    /// `model` is the id echoed back in every chunk
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn transcode_line(&self, line: &str) -> LineOutcome {
        let Some(payload) = line.strip_prefix(SSE_DATA_PREFIX).map(str::trim) else {
            return LineOutcome::Ignore;
        };

        if payload == SSE_DONE {
            return LineOutcome::Finish(FinalChatChunk::new(&self.model));
        }
        if payload.is_empty() {
            return LineOutcome::Ignore;
        }

        let chunk: CompletionChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Skipping malformed stream chunk: {} ({})", e, payload);
                return LineOutcome::Ignore;
            }
        };

        let Some(delta) = chunk.choices.into_iter().next().map(|c| c.delta) else {
            return LineOutcome::Ignore;
        };
        match delta.content {
            Some(content) => {
                let role = delta.role.as_deref().unwrap_or("assistant");
                LineOutcome::Emit(ChatChunk::new(&self.model, role, &content))
            }
            None => LineOutcome::Ignore,
        }
    }
}

/// One JSON document plus `\n`
pub fn encode_ndjson<T: Serialize>(value: &T) -> serde_json::Result<Bytes> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// `[DONE]` seen and the final chunk written
    Completed,
    /// Upstream closed without `[DONE]`
    UpstreamEnded,
    /// The client went away; the upstream read was dropped
    ClientGone,
    UpstreamError,
}

/// Read an SSE body and write NDJSON lines into `tx`, one line per event,
/// each sent before the next upstream read.
pub async fn pump_sse_to_ndjson<S, E>(
    mut upstream: S,
    transcoder: &SseTranscoder,
    tx: &mpsc::Sender<io::Result<Bytes>>,
    tee: Option<&DebugTee>,
) -> PumpOutcome
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut lines = LineBuffer::default();

    loop {
        let next = tokio::select! {
            next = upstream.next() => next,
            _ = tx.closed() => {
                tracing::debug!("Client disconnected from '{}' stream", transcoder.model());
                return PumpOutcome::ClientGone;
            }
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                tracing::warn!("Upstream stream for '{}' failed: {}", transcoder.model(), e);
                return PumpOutcome::UpstreamError;
            }
            None => break,
        };

        if let Some(tee) = tee {
            tee.observe(&chunk);
        }
        lines.push(&chunk);
        while let Some(line) = lines.next_line() {
            if let Some(outcome) = forward_line(&line, transcoder, tx).await {
                return outcome;
            }
        }
    }

    if let Some(line) = lines.take_remainder() {
        if let Some(outcome) = forward_line(&line, transcoder, tx).await {
            return outcome;
        }
    }

    tracing::warn!(
        "Upstream stream for '{}' ended without {}",
        transcoder.model(),
        SSE_DONE
    );
    PumpOutcome::UpstreamEnded
}

async fn forward_line(
    line: &str,
    transcoder: &SseTranscoder,
    tx: &mpsc::Sender<io::Result<Bytes>>,
) -> Option<PumpOutcome> {
    let (encoded, last) = match transcoder.transcode_line(line) {
        LineOutcome::Ignore => return None,
        LineOutcome::Emit(chunk) => (encode_ndjson(&chunk), false),
        LineOutcome::Finish(chunk) => (encode_ndjson(&chunk), true),
    };

    let bytes = match encoded {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to encode chat chunk: {}", e);
            return None;
        }
    };

    if tx.send(Ok(bytes)).await.is_err() {
        tracing::debug!("Client disconnected from '{}' stream", transcoder.model());
        return Some(PumpOutcome::ClientGone);
    }
    last.then_some(PumpOutcome::Completed)
}

/// Off-path copy of a response body for debug logging.
///
/// Bytes go through an unbounded channel to a logger task, so observing never
/// waits. The body is logged once the tee is dropped.
#[derive(Debug, Clone)]
pub struct DebugTee {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl DebugTee {
    pub fn spawn(label: impl Into<String>) -> Self {
        let label = label.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        tokio::spawn(async move {
            let mut body = Vec::new();
            while let Some(bytes) = rx.recv().await {
                body.extend_from_slice(&bytes);
            }
            tracing::info!("{} response body:\n{}", label, String::from_utf8_lossy(&body));
        });
        Self { tx }
    }

    pub fn observe(&self, bytes: &Bytes) {
        let _ = self.tx.send(bytes.clone());
    }
}

/// Pass a byte stream through unchanged, copying each chunk into `tee` if set
pub fn tee_stream<S, E>(
    stream: S,
    tee: Option<DebugTee>,
) -> impl Stream<Item = Result<Bytes, E>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
{
    stream.inspect(move |chunk| {
        if let (Some(tee), Ok(bytes)) = (tee.as_ref(), chunk) {
            tee.observe(bytes);
        }
    })
}
