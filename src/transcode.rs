//! Message text translation between the local dialect and the FTN dialect.
//!
//! Local text uses CR LF line ends, hides control lines behind `^D<digit>`, and carries
//! colour as heart codes (`^C<digit>`) or pipe codes (`|#<digit>`). FTN text uses CR line
//! ends, `^A` kludge lines, bare `AREA:`/`SEEN-BY:` lines, and may contain 0x8D soft
//! breaks. Both directions are total: nothing in here fails.

use serde::{Deserialize, Serialize};

pub const KLUDGE_MARKER: char = '\u{1}';
pub const CENTER_MARKER: char = '\u{2}';
pub const HEART_MARKER: char = '\u{3}';
pub const CONTROL_MARKER: char = '\u{4}';
pub const SOFT_BREAK: char = '\u{8d}';
const FILL: [char; 2] = ['\0', '\u{1a}'];

/// Kludges that survive export as `^A` lines.
const PEER_KLUDGES: [&str; 3] = ["MSGID:", "REPLY:", "PID:"];
const AREA_PREFIXES: [&str; 2] = ["AREA:", "SEEN-BY:"];

/// Classification shared by both translation directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `^A` prefixed FTN kludge.
    Kludge,
    AreaOrSeenBy,
    /// `^D<tier>` prefixed local control line.
    Control { tier: u8 },
    Plain,
}

pub fn classify_line(line: &str) -> LineKind {
    let mut chars = line.chars();
    match chars.next() {
        Some(KLUDGE_MARKER) => LineKind::Kludge,
        Some(CONTROL_MARKER) => match chars.next().and_then(|c| c.to_digit(10)) {
            Some(d) => LineKind::Control { tier: d as u8 },
            None => LineKind::Plain,
        },
        _ if AREA_PREFIXES.iter().any(|p| line.starts_with(p)) => LineKind::AreaOrSeenBy,
        _ => LineKind::Plain,
    }
}

fn default_palette() -> Vec<String> {
    ["|07", "|11", "|14", "|13", "|15", "|10", "|12", "|09", "|01", "|03"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Options for [`local_to_peer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeOptions {
    /// Highest `^D` tier (1-9) carried into FTN text.
    #[serde(default)]
    pub max_optional_tier: u8,
    #[serde(default)]
    pub allow_heart_colors: bool,
    #[serde(default)]
    pub allow_pipe_colors: bool,
    /// Replacement text for local colours 0-9.
    #[serde(default = "default_palette")]
    pub palette: Vec<String>,
    /// Keep `|XY` sequences that are not `|#<digit>` colours.
    #[serde(default)]
    pub allow_any_pipe_codes: bool,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            max_optional_tier: 0,
            allow_heart_colors: false,
            allow_pipe_colors: false,
            palette: default_palette(),
            allow_any_pipe_codes: false,
        }
    }
}

/// Split `text` on `sep`, without the empty piece after a final separator.
fn split_lines(text: &str, sep: char) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&str> = text.split(sep).collect();
    if text.ends_with(sep) {
        lines.pop();
    }
    lines
}

/// FTN body to local body.
pub fn peer_to_local(body: &str) -> String {
    let normalized: String = body
        .chars()
        .filter(|&c| c != '\n')
        .map(|c| if c == SOFT_BREAK { '\r' } else { c })
        .collect();
    let mut out = String::with_capacity(normalized.len() + 64);
    for line in split_lines(&normalized, '\r') {
        match classify_line(line) {
            LineKind::Kludge => {
                out.push(CONTROL_MARKER);
                out.push('0');
                out.push_str(&line[KLUDGE_MARKER.len_utf8()..]);
            }
            LineKind::AreaOrSeenBy => {
                out.push(CONTROL_MARKER);
                out.push('0');
                out.push_str(line);
            }
            LineKind::Control { .. } | LineKind::Plain => out.push_str(line),
        }
        out.push_str("\r\n");
    }
    out
}

fn palette_entry<'a>(options: &'a TranscodeOptions, digit: char) -> &'a str {
    digit
        .to_digit(10)
        .and_then(|d| options.palette.get(d as usize))
        .map(String::as_str)
        .unwrap_or("")
}

/// Rewrite or strip colour sequences in one line of text.
fn convert_colors(line: &str, options: &TranscodeOptions) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let after = chars.get(i + 2).copied();
        if c == HEART_MARKER {
            match next {
                Some(d) if d.is_ascii_digit() => {
                    if options.allow_heart_colors {
                        out.push_str(palette_entry(options, d));
                    }
                    i += 2;
                }
                _ => i += 1,
            }
            continue;
        }
        if c == '|' {
            match (next, after) {
                (Some('#'), Some(d)) if d.is_ascii_digit() => {
                    if options.allow_pipe_colors {
                        out.push_str(palette_entry(options, d));
                    }
                    i += 3;
                    continue;
                }
                (Some(a), Some(b)) if a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric() => {
                    if options.allow_any_pipe_codes {
                        out.push(c);
                        out.push(a);
                        out.push(b);
                    }
                    i += 3;
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn text_line(line: &str, options: &TranscodeOptions) -> String {
    let line = line.strip_suffix(KLUDGE_MARKER).unwrap_or(line);
    let line = line.strip_prefix(CENTER_MARKER).unwrap_or(line);
    convert_colors(line, options)
}

/// Translate one line, or `None` when it is dropped.
fn local_line_to_peer(line: &str, options: &TranscodeOptions) -> Option<String> {
    match classify_line(line) {
        LineKind::Control { tier } => {
            let content = &line[CONTROL_MARKER.len_utf8() + 1..];
            if tier == 0 {
                if PEER_KLUDGES.iter().any(|k| content.starts_with(k)) {
                    Some(format!("{}{}", KLUDGE_MARKER, content))
                } else if AREA_PREFIXES.iter().any(|p| content.starts_with(p)) {
                    Some(content.to_string())
                } else {
                    None
                }
            } else if tier > options.max_optional_tier {
                None
            } else {
                Some(text_line(content, options))
            }
        }
        LineKind::Kludge => Some(line.to_string()),
        // Typed by a user, not ours: a leading space keeps tossers from reading it as control.
        LineKind::AreaOrSeenBy => Some(format!(" {}", text_line(line, options))),
        LineKind::Plain => Some(text_line(line, options)),
    }
}

/// Local body to FTN body. Every output line ends in CR.
pub fn local_to_peer(body: &str, options: &TranscodeOptions) -> String {
    let cleaned: String = body
        .chars()
        .filter(|&c| c != '\n' && c != SOFT_BREAK)
        .collect();
    let cleaned = cleaned.trim_end_matches(FILL);
    let mut out = String::with_capacity(cleaned.len() + 16);
    for line in split_lines(cleaned, '\r') {
        if let Some(converted) = local_line_to_peer(line, options) {
            out.push_str(&converted);
            out.push('\r');
        }
    }
    out
}
