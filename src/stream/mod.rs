pub mod sse;

pub use sse::{encode_record, SseParser, SseRecord};

use crate::error::TurnError;
use futures_util::Stream;
use smallvec::SmallVec;

const DONE_SENTINEL: &str = "[DONE]";
const LOG_PREVIEW_CHARS: usize = 120;

/// A framed record whose payload has been decoded as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// Value of the record's `event:` line, if any.
    pub event_type: Option<String>,
    pub payload: serde_json::Value,
}

impl DecodedRecord {
    /// Event type from the `event:` line, falling back to the payload's
    /// `"type"` field for data-only providers.
    #[must_use]
    pub fn resolved_type(&self) -> Option<&str> {
        self.event_type
            .as_deref()
            .or_else(|| self.payload.get("type").and_then(serde_json::Value::as_str))
    }
}

/// Decode one framed record.
///
/// Returns `None` (after logging) when the payload is not valid JSON; the
/// caller keeps going with the next record.
#[must_use]
pub fn decode_record(record: SseRecord) -> Option<DecodedRecord> {
    let SseRecord { event, data } = record;
    let trimmed = data.trim();

    if trimmed == DONE_SENTINEL {
        return Some(DecodedRecord {
            event_type: Some(event.unwrap_or_else(|| "done".to_string())),
            payload: serde_json::Value::Null,
        });
    }
    if trimmed.is_empty() {
        return event.map(|event_type| DecodedRecord {
            event_type: Some(event_type),
            payload: serde_json::Value::Null,
        });
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(payload) => Some(DecodedRecord {
            event_type: event,
            payload,
        }),
        Err(err) => {
            tracing::warn!(
                event_type = event.as_deref().unwrap_or("<none>"),
                "skipping record with undecodable payload: {err} (data starts with {:?})",
                preview(trimmed)
            );
            None
        }
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Byte-level record decoder.
///
/// Holds back an incomplete UTF-8 sequence at the end of a chunk and an
/// incomplete record at the end of the text, so splitting the input at any
/// byte offset yields the same records as feeding it whole.
pub struct RecordDecoder {
    parser: SseParser,
    pending_bytes: Vec<u8>,
    framed: Vec<SseRecord>,
}

impl RecordDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            parser: SseParser::new(),
            pending_bytes: Vec::new(),
            framed: Vec::with_capacity(8),
        }
    }

    /// Feed a byte chunk and return the records it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecodedRecord> {
        let mut out = Vec::new();
        self.feed_into(bytes, &mut out);
        out
    }

    /// Feed a text chunk and return the records it completed.
    pub fn feed_str(&mut self, text: &str) -> Vec<DecodedRecord> {
        self.feed(text.as_bytes())
    }

    /// Feed a byte chunk and append completed records into `out`.
    pub fn feed_into(&mut self, bytes: &[u8], out: &mut Vec<DecodedRecord>) {
        if self.pending_bytes.is_empty() {
            if let Ok(text) = std::str::from_utf8(bytes) {
                self.parser.feed_into(text, &mut self.framed);
                self.drain_framed(out);
                return;
            }
        }
        self.pending_bytes.extend_from_slice(bytes);
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    self.parser.feed_into(text, &mut self.framed);
                    self.pending_bytes.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.pending_bytes[..valid_up_to]) {
                        self.parser.feed_into(text, &mut self.framed);
                    }
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending_bytes.drain(..valid_up_to);
                            break;
                        }
                        Some(invalid_len) => {
                            tracing::warn!("replacing {invalid_len} invalid UTF-8 byte(s) in stream");
                            self.parser.feed_into("\u{FFFD}", &mut self.framed);
                            self.pending_bytes.drain(..valid_up_to + invalid_len);
                        }
                    }
                }
            }
        }
        self.drain_framed(out);
    }

    /// Flush whatever the stream left behind once it has ended.
    pub fn finish(&mut self) -> Vec<DecodedRecord> {
        let mut out = Vec::new();
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.parser.feed_into(&tail, &mut self.framed);
        }
        self.parser.finish_into(&mut self.framed);
        self.drain_framed(&mut out);
        out
    }

    fn drain_framed(&mut self, out: &mut Vec<DecodedRecord>) {
        out.extend(self.framed.drain(..).filter_map(decode_record));
    }
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new()
    }
}

struct PendingRecords {
    records: SmallVec<[DecodedRecord; 8]>,
    head: usize,
}

impl PendingRecords {
    #[inline]
    fn new() -> Self {
        Self {
            records: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<DecodedRecord> {
        if self.head >= self.records.len() {
            return None;
        }
        let record = std::mem::replace(
            &mut self.records[self.head],
            DecodedRecord {
                event_type: None,
                payload: serde_json::Value::Null,
            },
        );
        self.head += 1;
        if self.head == self.records.len() {
            self.records.clear();
            self.head = 0;
        }
        Some(record)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<DecodedRecord>) {
        if parsed.is_empty() {
            return;
        }
        self.records.reserve(parsed.len());
        self.records.extend(parsed.drain(..));
    }
}

enum ReadState {
    Reading,
    Flushed,
}

/// Turn an HTTP body byte stream into a stream of decoded records.
///
/// Records come out in arrival order. A transport error is yielded once as
/// `Err` and ends the stream; a clean end flushes any unterminated record.
pub fn decoded_record_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<DecodedRecord, TurnError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            RecordDecoder::new(),
            Vec::<DecodedRecord>::with_capacity(8),
            PendingRecords::new(),
            ReadState::Reading,
        ),
        |(mut stream, mut decoder, mut parsed, mut pending, mut state)| async move {
            loop {
                if let Some(record) = pending.pop_front() {
                    return Some((Ok(record), (stream, decoder, parsed, pending, state)));
                }
                if matches!(state, ReadState::Flushed) {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        decoder.feed_into(&bytes, &mut parsed);
                        pending.extend_from_vec(&mut parsed);
                    }
                    Some(Err(err)) => {
                        state = ReadState::Flushed;
                        let err = TurnError::Stream(err.to_string());
                        return Some((Err(err), (stream, decoder, parsed, pending, state)));
                    }
                    None => {
                        let mut tail = decoder.finish();
                        pending.extend_from_vec(&mut tail);
                        state = ReadState::Flushed;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    const RECORD: &str = "event: content_block_delta\ndata: {\"index\":0,\n\
                          data: \"delta\":{\"type\":\"text_delta\",\"text\":\"héllo ✓\"}}\n\n";

    #[test]
    fn test_split_at_every_offset_matches_whole() {
        let bytes = RECORD.as_bytes();
        let whole = RecordDecoder::new().feed(bytes);
        assert_eq!(whole.len(), 1);

        for offset in 0..=bytes.len() {
            let mut decoder = RecordDecoder::new();
            let mut records = decoder.feed(&bytes[..offset]);
            records.extend(decoder.feed(&bytes[offset..]));
            assert_eq!(records, whole, "split at byte {offset}");
        }
    }

    #[test]
    fn test_bad_json_is_skipped_without_losing_neighbours() {
        let mut decoder = RecordDecoder::new();
        let records = decoder.feed_str(
            "event: a\ndata: {\"n\":1}\n\nevent: b\ndata: {broken\n\nevent: c\ndata: {\"n\":3}\n\n",
        );
        let types: Vec<_> = records.iter().filter_map(DecodedRecord::resolved_type).collect();
        assert_eq!(types, ["a", "c"]);
    }

    #[test]
    fn test_done_sentinel() {
        let records = RecordDecoder::new().feed_str("data: [DONE]\n\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resolved_type(), Some("done"));
    }

    #[test]
    fn test_type_falls_back_to_payload_field() {
        let records = RecordDecoder::new().feed_str("data: {\"type\":\"stream_complete\"}\n\n");
        assert_eq!(records[0].event_type, None);
        assert_eq!(records[0].resolved_type(), Some("stream_complete"));
    }

    #[tokio::test]
    async fn test_record_stream_flushes_tail_and_reports_errors() {
        let chunks: Vec<Result<bytes::Bytes, String>> = vec![
            Ok(bytes::Bytes::from_static(b"event: a\ndata: {}\n\nevent: b\nda")),
            Ok(bytes::Bytes::from_static(b"ta: {}")),
        ];
        let records: Vec<_> = decoded_record_stream(futures_util::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].as_ref().unwrap().resolved_type(), Some("b"));

        let chunks: Vec<Result<bytes::Bytes, String>> = vec![
            Ok(bytes::Bytes::from_static(b"event: a\ndata: {}\n\n")),
            Err("connection reset".to_string()),
        ];
        let records: Vec<_> = decoded_record_stream(futures_util::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(records.len(), 2);
        assert!(matches!(records[1], Err(TurnError::Stream(_))));
    }
}
