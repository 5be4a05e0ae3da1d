//! Streaming sink, the per-session Server-Sent-Events output channel
//!
//! A `StreamSink` is the write half of one long-lived event-stream
//! response. Frames are buffered in an unbounded channel until the HTTP
//! body is polled, so writes never block the scheduler.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Event type written before every payload
pub const EVENT_TYPE: &str = "message";

/// Frame a payload as one event block
///
/// `event: message`, one `data:` line per payload line, blank terminator.
pub fn encode_event(payload: &str) -> String {
    let mut frame = String::with_capacity(payload.len() + 32);
    frame.push_str("event: ");
    frame.push_str(EVENT_TYPE);
    frame.push('\n');
    for line in payload.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// A decoded event block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Parse a stream of event blocks back into payloads
///
/// Data lines of one block are joined with `\n`. Comment lines and blocks
/// without data are skipped. A trailing unterminated block is ignored.
pub fn decode_events(input: &str) -> Vec<DecodedEvent> {
    let mut events = Vec::new();
    let mut event: Option<String> = None;
    let mut data: Option<String> = None;

    for line in input.split('\n') {
        if line.is_empty() {
            if let Some(data) = data.take() {
                events.push(DecodedEvent {
                    event: event.take(),
                    data,
                });
            }
            event = None;
            continue;
        }
        if line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    events
}

/// Write half of one event-stream response
#[derive(Debug)]
pub struct StreamSink {
    id: u64,
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    ended: CancellationToken,
}

impl StreamSink {
    /// Open a sink, returning it with the receiver feeding the HTTP body
    pub fn open(id: u64) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            id,
            tx: Some(tx),
            ended: CancellationToken::new(),
        };
        (sink, rx)
    }

    /// Transport-assigned identifier, unique per process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether frames written now can still reach the peer
    pub fn is_writable(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Frame and write one payload; returns false if the sink is closed
    pub fn write_event(&self, payload: &str) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Bytes::from(encode_event(payload))).is_ok(),
            None => false,
        }
    }

    /// Close the stream; safe to call repeatedly
    pub fn end(&mut self) {
        if self.tx.take().is_some() {
            self.ended.cancel();
        }
    }

    /// Future resolving when the stream stops
    ///
    /// Yields `true` if the peer went away, `false` if `end()` was called.
    /// `None` when the sink is already ended.
    pub fn closed(&self) -> Option<impl std::future::Future<Output = bool> + Send + 'static> {
        let tx = self.tx.clone()?;
        let ended = self.ended.clone();
        Some(async move {
            tokio::select! {
                _ = tx.closed() => true,
                _ = ended.cancelled() => false,
            }
        })
    }
}

impl Drop for StreamSink {
    fn drop(&mut self) {
        self.end();
    }
}
