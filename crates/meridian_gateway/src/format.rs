//! Capability-driven output formatting.
//!
//! The logic process writes rich text with ANSI escape sequences; each
//! connection renders it down to what the client negotiated. A dumb
//! client gets plain text, a 16-color client gets 256-color codes
//! remapped, and everyone gets telnet line endings.

use meridian_session::ProtocolFlagMap;

/// Flag lookups the formatter needs, tolerant of a missing map.
fn flag_bool(flags: &ProtocolFlagMap, key: &str) -> bool {
    flags.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Renders logic-side text for one session's negotiated capabilities.
///
/// Normalizes line endings to `\r\n` and strips or downgrades ANSI
/// escape sequences the client cannot display.
pub fn render(text: &str, flags: &ProtocolFlagMap) -> String {
    let ansi = flag_bool(flags, "ansi");
    let xterm256 = flag_bool(flags, "xterm256");

    let styled = if !ansi {
        strip_ansi(text)
    } else if !xterm256 {
        downgrade_256(text)
    } else {
        text.to_string()
    };
    normalize_newlines(&styled)
}

/// Converts bare `\n` to the `\r\n` telnet expects, leaving existing
/// `\r\n` pairs alone.
pub fn normalize_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_cr = false;
    for ch in text.chars() {
        if ch == '\n' && !prev_cr {
            out.push('\r');
        }
        prev_cr = ch == '\r';
        out.push(ch);
    }
    out
}

/// Removes every CSI escape sequence.
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            // Consume parameter/intermediate bytes up to the final byte.
            for seq_ch in chars.by_ref() {
                if ('\x40'..='\x7e').contains(&seq_ch) {
                    break;
                }
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Remaps `38;5;N` / `48;5;N` color parameters onto the basic 16-color
/// palette for clients without xterm256 support.
pub fn downgrade_256(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("\x1b[") {
        out.push_str(&rest[..start]);
        let seq = &rest[start..];
        let Some(end) = seq[2..].find(|c: char| ('\x40'..='\x7e').contains(&c)) else {
            // Truncated sequence at end of buffer.
            out.push_str(seq);
            break;
        };
        let final_byte = seq.as_bytes()[2 + end] as char;
        let params = &seq[2..2 + end];
        if final_byte == 'm' {
            out.push_str("\x1b[");
            out.push_str(&downgrade_params(params));
            out.push('m');
        } else {
            out.push_str(&seq[..2 + end + 1]);
        }
        rest = &seq[2 + end + 1..];
    }
    out.push_str(rest);
    out
}

fn downgrade_params(params: &str) -> String {
    let values: Vec<u16> = params
        .split(';')
        .filter_map(|p| p.parse().ok())
        .collect();
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;
    while i < values.len() {
        match values.get(i..i + 3) {
            Some([kind @ (38 | 48), 5, color]) => {
                let base = if *kind == 38 { 30 } else { 40 };
                let (code, bright) = basic_color(*color);
                if bright && *kind == 38 {
                    out.push("1".into());
                }
                out.push((base + code).to_string());
                i += 3;
            }
            _ => {
                out.push(values[i].to_string());
                i += 1;
            }
        }
    }
    out.join(";")
}

/// Nearest basic color (0-7) plus a brightness hint for an xterm256
/// palette index.
fn basic_color(index: u16) -> (u16, bool) {
    match index {
        0..=7 => (index, false),
        8..=15 => (index - 8, true),
        16..=231 => {
            // 6x6x6 color cube.
            let idx = index - 16;
            let r = idx / 36;
            let g = (idx % 36) / 6;
            let b = idx % 6;
            // ANSI color bits: red=1, green=2, blue=4.
            let code = u16::from(r >= 3) | (u16::from(g >= 3) << 1) | (u16::from(b >= 3) << 2);
            (code, r + g + b >= 12)
        }
        _ => {
            // Grayscale ramp.
            let level = index.saturating_sub(232);
            if level < 6 {
                (0, true)
            } else if level < 18 {
                (7, false)
            } else {
                (7, true)
            }
        }
    }
}
