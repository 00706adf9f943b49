//! Logging helpers for peer-supplied strings (subjects, names, passwords) so one message
//! always produces one log line.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`, `\r` => `\\r`, `\t` => `\\t`, backslash => `\\\\`
/// - other C0 controls use caret notation (`^A` for a kludge marker)
/// - remaining control characters (including 0x8D soft breaks) => `\\xNN`
///
/// Long values are cut at 300 characters with an ellipsis.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push('^');
                out.push(char::from(b'@' + c as u8));
            }
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape_log;

    #[test]
    fn escapes_line_breaks_and_kludges() {
        assert_eq!(escape_log("Line1\nLine2\r\tEnd"), "Line1\\nLine2\\r\\tEnd");
        assert_eq!(escape_log("\u{1}MSGID: x\u{8d}y"), "^AMSGID: x\\x8Dy");
        assert_eq!(escape_log("a\0b"), "a^@b");
    }

    #[test]
    fn truncates_long_values() {
        let long = "x".repeat(400);
        let esc = escape_log(&long);
        assert_eq!(esc.chars().count(), 301);
        assert!(esc.ends_with('…'));
    }
}
