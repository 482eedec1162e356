//! Decoding and classification of the upstream `data: <json>` line protocol.

use std::sync::Arc;

use repair_qa_common::{EventKind, QueueEvent};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::routing::RoutingTable;

const DATA_PREFIX: &str = "data: ";
const CHART_FENCE_OPEN: usize = 11; // "```echarts\n"
const CHART_FENCE_CLOSE: usize = 4; // "\n```"

/// Splits a byte stream into text lines.
///
/// Bytes are buffered until a `\n` arrives, so a line (or a multi-byte
/// character) split across chunks decodes the same as an unsplit one.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Flush a trailing line that was not newline-terminated
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
    String::from_utf8_lossy(bytes).into_owned()
}

/// One upstream event
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub from_variable_selector: Option<Vec<Value>>,
    #[serde(default)]
    pub message: Option<Value>,
}

impl Envelope {
    /// Node id that produced this fragment
    pub fn selector(&self) -> Option<String> {
        match self.from_variable_selector.as_ref()?.first()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn error_message(&self) -> String {
        match &self.message {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "upstream reported an error".to_string(),
        }
    }
}

/// Parse a raw line. Non-`data:` lines and malformed JSON yield `None`.
pub fn parse_line(line: &str) -> Option<Envelope> {
    let json = line.strip_prefix(DATA_PREFIX)?;
    match serde_json::from_str(json) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(error = %e, "Skipping malformed upstream line");
            None
        }
    }
}

/// Drop the markdown fence around a chart answer.
///
/// Counted in characters; answers too short to hold both fences become empty.
pub fn strip_chart_fence(answer: &str) -> String {
    let len = answer.chars().count();
    if len <= CHART_FENCE_OPEN + CHART_FENCE_CLOSE {
        return String::new();
    }
    answer
        .chars()
        .skip(CHART_FENCE_OPEN)
        .take(len - CHART_FENCE_OPEN - CHART_FENCE_CLOSE)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Skip,
    Emit(QueueEvent),
    /// `message_end`
    Finished,
    /// Upstream `error` event
    Failed(String),
}

/// Per-run classifier: routes `message` events and keeps the chart flag.
#[derive(Debug)]
pub struct FrameClassifier {
    routing: Arc<RoutingTable>,
    chart_sent: bool,
}

impl FrameClassifier {
    pub fn new(routing: Arc<RoutingTable>) -> Self {
        Self {
            routing,
            chart_sent: false,
        }
    }

    pub fn classify(&mut self, line: &str) -> Classified {
        match parse_line(line) {
            Some(envelope) => self.classify_envelope(&envelope),
            None => Classified::Skip,
        }
    }

    pub fn classify_envelope(&mut self, envelope: &Envelope) -> Classified {
        match envelope.event.as_str() {
            "message_end" => Classified::Finished,
            "error" => Classified::Failed(envelope.error_message()),
            "message" => self.route_message(envelope),
            other => {
                trace!(event = other, "Ignoring upstream event");
                Classified::Skip
            }
        }
    }

    fn route_message(&mut self, envelope: &Envelope) -> Classified {
        let (Some(selector), Some(answer)) = (envelope.selector(), envelope.answer.as_deref()) else {
            return Classified::Skip;
        };
        let Some(kind) = self.routing.lookup(&selector) else {
            trace!(selector = %selector, "Unmapped selector");
            return Classified::Skip;
        };

        match kind {
            EventKind::Echarts if self.chart_sent => {
                debug!(selector = %selector, "Dropping additional chart");
                Classified::Skip
            }
            EventKind::Echarts => {
                self.chart_sent = true;
                Classified::Emit(QueueEvent::chart(strip_chart_fence(answer)))
            }
            other => Classified::Emit(QueueEvent::text(other.clone(), answer)),
        }
    }

    pub fn chart_sent(&self) -> bool {
        self.chart_sent
    }
}
