use std::borrow::Cow;
use std::sync::OnceLock;

use memchr::memchr2;
use regex_lite::Regex;
use serde::Serialize;

use crate::protocol::ThinkingMetrics;

// ---------------------------------------------------------------------------
// Flat thinking trace
// ---------------------------------------------------------------------------

/// Reasoning accumulated from flat `thinking_*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThinkingTrace {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ThinkingMetrics>,
    #[serde(skip)]
    pub active: bool,
}

impl ThinkingTrace {
    pub fn start(&mut self, initial: &str) {
        self.active = true;
        self.text.push_str(initial);
    }

    pub fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    pub fn stop(&mut self, metrics: ThinkingMetrics) {
        self.active = false;
        self.merge_metrics(metrics);
    }

    /// Fields present in `update` overwrite earlier values.
    pub fn merge_metrics(&mut self, update: ThinkingMetrics) {
        let metrics = self.metrics.get_or_insert_with(ThinkingMetrics::default);
        if update.token_count.is_some() {
            metrics.token_count = update.token_count;
        }
        if update.elapsed_ms.is_some() {
            metrics.elapsed_ms = update.elapsed_ms;
        }
        if update.tokens_per_second.is_some() {
            metrics.tokens_per_second = update.tokens_per_second;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Inline marker extraction
// ---------------------------------------------------------------------------

struct Marker {
    open: &'static str,
    close: &'static str,
    nests: bool,
}

const MARKERS: &[Marker] = &[
    Marker {
        open: "<thinking>",
        close: "</thinking>",
        nests: true,
    },
    Marker {
        open: "<think>",
        close: "</think>",
        nests: true,
    },
    Marker {
        open: "<reasoning>",
        close: "</reasoning>",
        nests: true,
    },
    Marker {
        open: "<tool_code>",
        close: "</tool_code>",
        nests: true,
    },
    Marker {
        open: "```tool_code",
        close: "```",
        nests: false,
    },
];

const PART_SEPARATOR: &str = "\n\n";

/// Text split into its visible remainder and the reasoning regions removed
/// from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted<'a> {
    /// Trimmed with blank runs collapsed, whether or not markers were
    /// found. Borrowed when that changes nothing but the ends.
    pub visible: Cow<'a, str>,
    /// Removed regions, trimmed and joined by a blank line. Empty when
    /// nothing was removed.
    pub extracted: String,
}

/// Split inline reasoning markers out of `text`.
///
/// An opening marker without its closer swallows the rest of the text, so a
/// partially streamed region never leaks into `visible`. Stray closers are
/// left in place.
#[must_use]
pub fn extract_thinking(text: &str) -> Extracted<'_> {
    if !contains_open_marker(text) {
        return Extracted {
            visible: collapse_blank_runs(text.trim()),
            extracted: String::new(),
        };
    }

    let bytes = text.as_bytes();
    let mut visible = String::with_capacity(text.len());
    let mut parts: Vec<&str> = Vec::new();
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        let Some(rel) = memchr2(b'<', b'`', &bytes[cursor..]) else {
            visible.push_str(&text[cursor..]);
            break;
        };
        let abs = cursor + rel;
        let Some(marker) = marker_at(&text[abs..]) else {
            visible.push_str(&text[cursor..=abs]);
            cursor = abs + 1;
            continue;
        };

        visible.push_str(&text[cursor..abs]);
        let body_start = abs + marker.open.len();
        match region_end(text, body_start, marker) {
            Some((body_end, region_end)) => {
                parts.push(text[body_start..body_end].trim());
                cursor = region_end;
            }
            None => {
                parts.push(text[body_start..].trim());
                cursor = bytes.len();
            }
        }
    }

    let extracted = parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(PART_SEPARATOR);

    Extracted {
        visible: Cow::Owned(collapse_blank_runs(&visible).trim().to_string()),
        extracted,
    }
}

fn contains_open_marker(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut cursor = 0usize;
    while let Some(rel) = memchr2(b'<', b'`', &bytes[cursor..]) {
        let abs = cursor + rel;
        if marker_at(&text[abs..]).is_some() {
            return true;
        }
        cursor = abs + 1;
    }
    false
}

#[inline]
fn marker_at(text: &str) -> Option<&'static Marker> {
    MARKERS.iter().find(|marker| text.starts_with(marker.open))
}

/// Find the end of the region opened just before `body_start`. Returns the
/// body end and the offset right after the closer.
fn region_end(text: &str, body_start: usize, marker: &Marker) -> Option<(usize, usize)> {
    let mut depth = 1usize;
    let mut cursor = body_start;
    loop {
        let rest = &text[cursor..];
        let close = rest.find(marker.close)?;
        if marker.nests {
            if let Some(open) = rest.find(marker.open).filter(|open| *open < close) {
                depth += 1;
                cursor += open + marker.open.len();
                continue;
            }
        }
        depth -= 1;
        let close_abs = cursor + close;
        if depth == 0 {
            return Some((close_abs, close_abs + marker.close.len()));
        }
        cursor = close_abs + marker.close.len();
    }
}

fn blank_run_regex() -> Option<&'static Regex> {
    static BLANK_RUNS: OnceLock<Option<Regex>> = OnceLock::new();
    BLANK_RUNS
        .get_or_init(|| Regex::new(r"(?:\r?\n){3,}").ok())
        .as_ref()
}

fn collapse_blank_runs(text: &str) -> Cow<'_, str> {
    match blank_run_regex() {
        Some(re) => re.replace_all(text, PART_SEPARATOR),
        None => Cow::Borrowed(text),
    }
}
