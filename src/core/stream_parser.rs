//! Framing for the streamed generate-content response.
//!
//! The endpoint delivers a pretty-printed JSON array one line at a time:
//!
//! ```text
//! [{
//!   "candidates": [ ... ]
//! }
//! ,
//! {
//!   "candidates": [ ... ]
//! }
//! ]
//! ```
//!
//! [`LineBuffer`] turns arbitrary byte chunks into whole lines and
//! [`StreamParser`] turns those lines into [`ParseEvent`]s. Only sentinel lines
//! are interpreted; everything else is accumulated verbatim until the next
//! object boundary.

use memchr::memchr;
use serde_json::Value;
use tracing::debug;

use crate::api::GenerateResponse;
use crate::core::message::Part;

/// First line of the response array; it also opens the first object.
pub const OPEN_SENTINEL: &str = "[{";
/// Separator between array elements (sent as `,\r\n`).
pub const BOUNDARY_SENTINEL: &str = ",";
/// Last line of the response array.
pub const CLOSE_SENTINEL: &str = "]";

pub const MALFORMED_OBJECT_NOTICE: &str =
    "The response stream contained an unreadable fragment; the reply ends here.";

const REJECTION_FINISH_REASONS: [&str; 6] = [
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "OTHER",
];

/// Splits a byte stream into lines regardless of how the transport chunks it.
#[derive(Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(relative) = memchr(b'\n', &self.buffer[start..]) {
            let newline = start + relative;
            lines.push(decode_line(&self.buffer[start..newline]));
            start = newline + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Flush whatever trails the final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = decode_line(&self.buffer);
        self.buffer.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(err) => {
            debug!(error = %err, "Invalid UTF-8 in stream line");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserPhase {
    Idle,
    AccumulatingObject,
    StreamClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// The open sentinel arrived; the reply is no longer "thinking".
    Opened,
    /// One content fragment extracted from a complete response object.
    Delta(Part),
    /// The provider refused to answer; carries readable diagnostic text.
    Rejected(String),
    /// An object could not be parsed. The fragment is dropped and the
    /// parser closes.
    Malformed(String),
    Closed,
}

/// Line-level state machine for one response stream.
///
/// Each outbound request owns its own parser, so the accumulation buffer is
/// never shared between concurrent turns.
pub struct StreamParser {
    phase: ParserPhase,
    buffer: String,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            phase: ParserPhase::Idle,
            buffer: String::new(),
        }
    }

    pub fn phase(&self) -> ParserPhase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ParserPhase::StreamClosed
    }

    /// Text accumulated since the last object boundary.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Sentinels are matched against the whole line, so indented brackets
    /// that belong to the object never end it.
    pub fn feed_line(&mut self, line: &str) -> Vec<ParseEvent> {
        let sentinel = line.strip_suffix('\r').unwrap_or(line);
        match self.phase {
            ParserPhase::StreamClosed => Vec::new(),
            ParserPhase::Idle => {
                self.phase = ParserPhase::AccumulatingObject;
                if sentinel == OPEN_SENTINEL {
                    self.buffer.push('{');
                } else if sentinel != "[" {
                    // Some proxies strip the array wrapper; treat the line as
                    // the start of the first object.
                    self.append(line);
                }
                vec![ParseEvent::Opened]
            }
            ParserPhase::AccumulatingObject => {
                if sentinel == BOUNDARY_SENTINEL {
                    self.flush_object()
                } else if sentinel == CLOSE_SENTINEL {
                    let mut events = self.flush_object();
                    if !self.is_closed() {
                        self.phase = ParserPhase::StreamClosed;
                        events.push(ParseEvent::Closed);
                    }
                    events
                } else {
                    self.append(line);
                    Vec::new()
                }
            }
        }
    }

    /// End of input, whatever the cause. Always leaves the parser closed.
    pub fn finish(&mut self) -> Vec<ParseEvent> {
        if self.is_closed() {
            return Vec::new();
        }
        let mut events = self.flush_object();
        if !self.is_closed() {
            self.phase = ParserPhase::StreamClosed;
            events.push(ParseEvent::Closed);
        }
        events
    }

    fn append(&mut self, line: &str) {
        self.buffer.push_str(line);
        self.buffer.push('\n');
    }

    fn flush_object(&mut self) -> Vec<ParseEvent> {
        let raw = std::mem::take(&mut self.buffer);
        if raw.trim().is_empty() || raw.trim() == "{" {
            return Vec::new();
        }

        match parse_object(&raw).and_then(events_from_object) {
            Some(events) => events,
            None => {
                debug!(bytes = raw.len(), "Dropping unparsable response object");
                self.phase = ParserPhase::StreamClosed;
                vec![
                    ParseEvent::Malformed(MALFORMED_OBJECT_NOTICE.to_string()),
                    ParseEvent::Closed,
                ]
            }
        }
    }
}

/// Parse one accumulated object, tolerating a doubled opening brace and
/// stray closing brackets left behind by line-level framing. An object that
/// is still open at the boundary is truncated and never parses.
fn parse_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    let mut candidates = vec![trimmed];
    if let Some(rest) = trimmed.strip_prefix('{') {
        if rest.trim_start().starts_with('{') {
            candidates.push(rest.trim_start());
        }
    }

    for candidate in candidates {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            if value.is_object() {
                return Some(value);
            }
        }
        if let Some(repaired) = repair_brackets(candidate) {
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Drop closing brackets that do not match the innermost open one. Returns
/// `None` when nothing changed, when a bracket is left open, or when the
/// input ends inside a string literal.
fn repair_brackets(input: &str) -> Option<String> {
    let mut out = String::with_capacity(input.len() + 4);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut changed = false;

    for ch in input.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '{' => {
                stack.push('}');
                out.push(ch);
            }
            '[' => {
                stack.push(']');
                out.push(ch);
            }
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                    out.push(ch);
                } else {
                    changed = true;
                }
            }
            _ => out.push(ch),
        }
    }

    if in_string || !stack.is_empty() {
        return None;
    }
    changed.then_some(out)
}

fn events_from_object(value: Value) -> Option<Vec<ParseEvent>> {
    let response: GenerateResponse = serde_json::from_value(value).ok()?;

    if let Some(error) = response.error {
        let summary = error
            .message
            .map(|m| m.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_else(|| "unknown error".to_string());
        let text = match (error.code, error.status) {
            (Some(code), Some(status)) => format!("API Error ({code} {status}): {summary}"),
            (Some(code), None) => format!("API Error ({code}): {summary}"),
            (None, Some(status)) => format!("API Error ({status}): {summary}"),
            (None, None) => format!("API Error: {summary}"),
        };
        return Some(vec![ParseEvent::Rejected(text)]);
    }

    if let Some(feedback) = response.prompt_feedback {
        if let Some(reason) = feedback.block_reason {
            let text = match feedback.block_reason_message {
                Some(detail) if !detail.trim().is_empty() => {
                    format!("Request blocked by provider: {reason} ({})", detail.trim())
                }
                _ => format!("Request blocked by provider: {reason}"),
            };
            return Some(vec![ParseEvent::Rejected(text)]);
        }
    }

    let mut events = Vec::new();
    if let Some(candidate) = response.candidates.into_iter().next() {
        let parts = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default();
        for part in parts {
            if let Some(text) = part.text {
                if !text.is_empty() {
                    events.push(ParseEvent::Delta(Part::Text(text)));
                }
            } else if let Some(inline) = part.inline_data {
                events.push(ParseEvent::Delta(Part::InlineData {
                    mime_type: inline.mime_type,
                    data: inline.data,
                }));
            }
        }

        if events.is_empty() {
            if let Some(reason) = candidate
                .finish_reason
                .filter(|reason| REJECTION_FINISH_REASONS.contains(&reason.as_str()))
            {
                events.push(ParseEvent::Rejected(format!(
                    "Response stopped by provider: {reason}"
                )));
            }
        }
    }
    Some(events)
}

/// Run a complete set of lines through a fresh parser, including the
/// end-of-input flush.
pub fn parse_lines<'a, I>(lines: I) -> Vec<ParseEvent>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut parser = StreamParser::new();
    let mut events = Vec::new();
    for line in lines {
        events.extend(parser.feed_line(line));
    }
    events.extend(parser.finish());
    events
}
