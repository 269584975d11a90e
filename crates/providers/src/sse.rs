//! Server-sent events framing.
//!
//! Both adapters receive `text/event-stream` bodies. [`SseParser`] turns
//! transport chunks of arbitrary size into complete events; the
//! per-provider decoders interpret the `data` payloads.

use pi_runtime::{PiError, Result};

/// Abort the stream if a single event grows past this.
const MAX_BUF: usize = 16 * 1024 * 1024;

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Incremental SSE parser.
///
/// Accepts LF and CRLF line endings, multi-line `data:` fields and
/// comment lines. UTF-8 sequences split across chunks are carried over;
/// bytes that can never form valid UTF-8 fail with `Decode`.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Undecoded tail of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    /// Decoded text not yet terminated by a newline.
    line: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.pending.extend_from_slice(chunk);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(PiError::Decode(format!(
                    "invalid UTF-8 in event stream: {e}"
                )));
            }
        };
        let rest = self.pending.split_off(valid);
        let text = std::mem::replace(&mut self.pending, rest);
        let text = String::from_utf8(text)
            .map_err(|e| PiError::Decode(format!("invalid UTF-8 in event stream: {e}")))?;

        let mut events = Vec::new();
        for piece in text.split_inclusive('\n') {
            self.line.push_str(piece);
            if !self.line.ends_with('\n') {
                break;
            }
            let line = std::mem::take(&mut self.line);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if let Some(event) = self.line_complete(line) {
                events.push(event);
            }
        }

        if self.line.len() + self.buffered() > MAX_BUF {
            return Err(PiError::Decode("event stream frame exceeded 16 MiB".into()));
        }
        Ok(events)
    }

    /// Flush after the body has ended.
    ///
    /// A final event missing its blank-line terminator is still dispatched.
    pub fn finish(&mut self) -> Result<Option<SseEvent>> {
        if !self.pending.is_empty() {
            return Err(PiError::Decode(
                "event stream ended inside a UTF-8 sequence".into(),
            ));
        }
        let line = std::mem::take(&mut self.line);
        let line = line.trim_end_matches('\r');
        if let Some(event) = self.line_complete(line) {
            return Ok(Some(event));
        }
        Ok(self.dispatch())
    }

    fn buffered(&self) -> usize {
        self.data.iter().map(String::len).sum()
    }

    fn line_complete(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            // id and retry do not affect decoding
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut SseParser, chunks: &[&[u8]]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.push(chunk).unwrap());
        }
        events.extend(parser.finish().unwrap());
        events
    }

    fn data(events: &[SseEvent]) -> Vec<&str> {
        events.iter().map(|e| e.data.as_str()).collect()
    }

    const BODY: &str = ": keep-alive\n\
        event: message_start\n\
        data: {\"a\":1}\n\
        \n\
        data: first\n\
        data: second\n\
        \n\
        id: 7\n\
        data: é 東京 🚀\n\
        \n";

    #[test]
    fn parses_whole_body() {
        let events = feed(&mut SseParser::new(), &[BODY.as_bytes()]);
        assert_eq!(data(&events), vec!["{\"a\":1}", "first\nsecond", "é 東京 🚀"]);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[1].event, None);
    }

    #[test]
    fn every_split_point_yields_the_same_events() {
        let bytes = BODY.as_bytes();
        let whole = feed(&mut SseParser::new(), &[bytes]);
        for at in 0..=bytes.len() {
            let (a, b) = bytes.split_at(at);
            assert_eq!(feed(&mut SseParser::new(), &[a, b]), whole, "split at {at}");
        }
    }

    #[test]
    fn byte_at_a_time() {
        let chunks: Vec<&[u8]> = BODY.as_bytes().chunks(1).collect();
        assert_eq!(feed(&mut SseParser::new(), &chunks).len(), 3);
    }

    #[test]
    fn crlf_delimiters() {
        let body = BODY.replace('\n', "\r\n");
        let events = feed(&mut SseParser::new(), &[body.as_bytes()]);
        assert_eq!(data(&events), vec!["{\"a\":1}", "first\nsecond", "é 東京 🚀"]);
    }

    #[test]
    fn missing_final_blank_line_is_flushed() {
        let events = feed(&mut SseParser::new(), &[b"data: [DONE]".as_slice()]);
        assert_eq!(data(&events), vec!["[DONE]"]);
    }

    #[test]
    fn data_without_space_and_comment_only() {
        let events = feed(&mut SseParser::new(), &[b"data:x\n\n:ping\n\n".as_slice()]);
        assert_eq!(data(&events), vec!["x"]);
    }

    #[test]
    fn invalid_utf8_is_decode_error() {
        let err = SseParser::new().push(b"data: \xff\xfe\n\n").unwrap_err();
        assert!(matches!(err, PiError::Decode(_)));
    }

    #[test]
    fn truncated_utf8_at_end_is_decode_error() {
        let mut parser = SseParser::new();
        parser.push(b"data: \xe6\x9d").unwrap();
        assert!(matches!(parser.finish(), Err(PiError::Decode(_))));
    }
}
