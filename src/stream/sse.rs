/// Record framing for the turn event stream.
///
/// Records are `event:`/`data:` line groups terminated by a blank line, as in
/// [server-sent events](https://html.spec.whatwg.org/multipage/server-sent-events.html).
/// The parser only frames records; JSON decoding happens one layer up.
use memchr::memchr_iter;

/// One framed record before its payload is decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseRecord {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental record parser.
///
/// Feed it text chunks split at arbitrary positions and it yields each record
/// once its terminating blank line has arrived. The unterminated tail stays
/// buffered until the next call.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            event_type: None,
            data_buffer: String::new(),
            has_data: false,
        }
    }

    /// Feed raw text and return any complete records.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseRecord> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete records into a caller-provided buffer.
    ///
    /// Line rules:
    /// - `event:` sets the type of the record being built
    /// - `data:` appends to the payload (one leading space stripped); repeated
    ///   `data:` lines are joined with `\n`
    /// - an empty line terminates the record
    /// - `:` comments, `id:`, `retry:` and unknown fields are ignored
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseRecord>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a record that was not followed by a blank line.
    ///
    /// Called once the byte stream has ended. A trailing line without its
    /// newline is processed first.
    pub fn finish_into(&mut self, out: &mut Vec<SseRecord>) {
        if self.read_offset < self.buffer.len() {
            let tail = self.buffer[self.read_offset..].to_string();
            let line = tail.strip_suffix('\r').unwrap_or(&tail);
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
        }
        self.buffer.clear();
        self.read_offset = 0;
        Self::dispatch(
            &mut self.event_type,
            &mut self.data_buffer,
            &mut self.has_data,
            out,
        );
    }

    /// Bytes buffered but not yet terminated by a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }

    fn dispatch(
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        records: &mut Vec<SseRecord>,
    ) {
        // A typed record without data (`event: done`) is still a record.
        if *has_data || event_type.is_some() {
            records.push(SseRecord {
                event: event_type.take(),
                data: std::mem::take(data_buffer),
            });
            *has_data = false;
        }
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        records: &mut Vec<SseRecord>,
    ) {
        if line.is_empty() {
            Self::dispatch(event_type, data_buffer, has_data, records);
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value).trim_end();
            if value.is_empty() {
                *event_type = None;
            } else {
                *event_type = Some(value.to_string());
            }
        }
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a record as wire text, splitting multi-line payloads into several
/// `data:` lines.
#[must_use]
pub fn encode_record(event_type: Option<&str>, data: &str) -> String {
    let mut out = String::with_capacity(16 + data.len());
    if let Some(event) = event_type {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record_with_type() {
        let mut parser = SseParser::new();
        let records = parser.feed("event: done\ndata: {\"ok\":true}\n\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.as_deref(), Some("done"));
        assert_eq!(records[0].data, "{\"ok\":true}");
    }

    #[test]
    fn test_multi_line_data_is_joined() {
        let mut parser = SseParser::new();
        let records = parser.feed("data: {\"a\":\ndata: 1}\n\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, "{\"a\":\n1}");
    }

    #[test]
    fn test_partial_record_is_buffered() {
        let mut parser = SseParser::new();
        assert!(parser.feed("event: content_delta\ndata: {\"de").is_empty());
        assert!(parser.pending_len() > 0);
        let records = parser.feed("lta\":\"hi\"}\n\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, "{\"delta\":\"hi\"}");
    }

    #[test]
    fn test_crlf_and_comments() {
        let mut parser = SseParser::new();
        let records = parser.feed(": keep-alive\r\n\r\nevent: ping\r\ndata: {}\r\n\r\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.as_deref(), Some("ping"));
    }

    #[test]
    fn test_empty_records_are_skipped() {
        let mut parser = SseParser::new();
        assert!(parser.feed("\n\n\n\n").is_empty());
    }

    #[test]
    fn test_typed_record_without_data() {
        let mut parser = SseParser::new();
        let records = parser.feed("event: stream_complete\n\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, "");
    }

    #[test]
    fn test_finish_flushes_unterminated_record() {
        let mut parser = SseParser::new();
        assert!(parser.feed("event: done\ndata: {}").is_empty());
        let mut out = Vec::new();
        parser.finish_into(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event.as_deref(), Some("done"));
        assert_eq!(out[0].data, "{}");
    }

    #[test]
    fn test_encode_record_round_trips_multiline() {
        let wire = encode_record(Some("content_delta"), "{\n\"delta\":\"x\"\n}");
        let mut parser = SseParser::new();
        let records = parser.feed(&wire);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, "{\n\"delta\":\"x\"\n}");
    }
}
