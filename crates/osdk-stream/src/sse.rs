//! Incremental server-sent event decoding.
//!
//! Records are separated by a blank line. Within a record, `field: value`
//! lines accumulate; a single space after the colon is dropped, a line
//! without a colon is a field with an empty value, and lines starting with
//! `:` are comments. Multiple `data` lines join with `\n`. A record without
//! any `data` line is dropped. Chunk boundaries never change the output.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::error::{StreamError, StreamResult};

/// One dispatched event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
            id: None,
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Wire form, terminated by a blank line.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl fmt::Display for SseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(event) = &self.event {
            writeln!(f, "event: {event}")?;
        }
        if let Some(id) = &self.id {
            writeln!(f, "id: {id}")?;
        }
        for line in self.data.split('\n') {
            writeln!(f, "data: {line}")?;
        }
        writeln!(f)
    }
}

#[derive(Default)]
struct PendingRecord {
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
}

impl PendingRecord {
    fn take(&mut self) -> Option<SseEvent> {
        let record = std::mem::take(self);
        record.data.map(|data| SseEvent {
            event: record.event,
            data,
            id: record.id,
        })
    }
}

/// Push-based decoder: feed chunks, collect events.
///
/// Single pass; a new stream needs a new decoder.
#[derive(Default)]
pub struct SseDecoder {
    partial: Vec<u8>,
    record: PendingRecord,
    lines: u64,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> StreamResult<Vec<SseEvent>> {
        let mut out = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];
            let line = if self.partial.is_empty() {
                self.line(head)?
            } else {
                let mut joined = std::mem::take(&mut self.partial);
                joined.extend_from_slice(head);
                self.line(&joined)?
            };
            out.extend(line);
        }
        self.partial.extend_from_slice(rest);
        Ok(out)
    }

    /// Flush an unterminated trailing record.
    pub fn finish(mut self) -> StreamResult<Option<SseEvent>> {
        if !self.partial.is_empty() {
            let partial = std::mem::take(&mut self.partial);
            if let Some(event) = self.line(&partial)? {
                return Ok(Some(event));
            }
        }
        Ok(self.record.take())
    }

    fn line(&mut self, raw: &[u8]) -> StreamResult<Option<SseEvent>> {
        self.lines += 1;
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return Ok(self.record.take());
        }
        let line = std::str::from_utf8(raw).map_err(|_| StreamError::InvalidUtf8 {
            line: self.lines,
        })?;
        if line.starts_with(':') {
            return Ok(None);
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => match &mut self.record.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.record.data = Some(value.to_string()),
            },
            "event" => self.record.event = Some(value.to_string()),
            "id" => self.record.id = Some(value.to_string()),
            _ => {}
        }
        Ok(None)
    }
}

impl fmt::Debug for SseDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseDecoder")
            .field("buffered", &self.partial.len())
            .field("lines", &self.lines)
            .finish()
    }
}

/// Decode a complete buffer, flushing any unterminated trailing record.
pub fn decode_all(source: &[u8]) -> StreamResult<Vec<SseEvent>> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.feed(source)?;
    events.extend(decoder.finish()?);
    Ok(events)
}

/// Adapt a byte-chunk stream into a stream of events.
///
/// The stream ends after the first error, which is yielded as the last item.
/// Errors of the source itself surface as [`StreamError::Transport`].
pub fn parse_sse_events<S, B, E>(chunks: S) -> impl Stream<Item = StreamResult<SseEvent>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    struct State<S> {
        chunks: S,
        decoder: Option<SseDecoder>,
        ready: VecDeque<SseEvent>,
    }

    let initial = State {
        chunks,
        decoder: Some(SseDecoder::new()),
        ready: VecDeque::new(),
    };

    stream::unfold(initial, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            let decoder = state.decoder.as_mut()?;
            match state.chunks.next().await {
                Some(Ok(chunk)) => match decoder.feed(chunk.as_ref()) {
                    Ok(events) => state.ready.extend(events),
                    Err(err) => {
                        state.decoder = None;
                        return Some((Err(err), state));
                    }
                },
                Some(Err(err)) => {
                    state.decoder = None;
                    return Some((Err(StreamError::Transport(err.to_string())), state));
                }
                None => {
                    let decoder = state.decoder.take()?;
                    match decoder.finish() {
                        Ok(last) => state.ready.extend(last),
                        Err(err) => return Some((Err(err), state)),
                    }
                }
            }
        }
    })
}
