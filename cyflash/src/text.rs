//! Permissive console-text decoding.
//!
//! The device console is nominally ASCII but boot noise and baud glitches
//! produce arbitrary bytes, and multi-byte sequences can be split across
//! reads. Decoding must never stall the readiness loop, so invalid bytes
//! are replaced and an incomplete suffix is carried to the next read.

/// Drain buffered bytes into displayable UTF-8 text without stalling on
/// invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - Incomplete UTF-8 suffix is kept in `buffer` for the next read.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if valid_up_to > 0 {
                    if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                        output.push_str(valid);
                    }
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('�');
                        let drain_to = valid_up_to.saturating_add(invalid_len).min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        if valid_up_to > 0 {
                            buffer.drain(..valid_up_to);
                        }
                        break;
                    },
                }
            },
        }
    }

    output
}

/// Filter non-printable control characters for cleaner operator output.
///
/// Keeps \n, \t and printable Unicode chars.
/// Converts carriage returns (\r) to newlines (\n).
/// Drops other control characters.
pub fn clean_console_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\n' | '\t' => out.push(ch),
            '\r' => out.push('\n'),
            _ if ch.is_control() => {},
            _ => out.push(ch),
        }
    }
    out
}

/// Collect the lines of `text` that contain any of `filters`.
///
/// Used for surfacing diagnostic boot lines (version string, memory
/// frequency, training result) to the operator.
pub fn filter_lines(text: &str, filters: &[String]) -> Vec<String> {
    text.lines()
        .filter(|line| filters.iter().any(|f| line.contains(f.as_str())))
        .map(str::to_string)
        .collect()
}
