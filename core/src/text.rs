//! ICCCM text-encoding validators.
//!
//! These decide which text targets a payload may be advertised under. The
//! ICCCM `STRING` type is Latin-1 restricted to printable characters plus
//! newline and tab; `UTF8_STRING` carries the same control-character
//! restriction on top of well-formed UTF-8.

/// Whether the payload is a valid ICCCM `STRING` (printable Latin-1 plus
/// `\n` and `\t`).
pub fn is_icccm_string(data: &[u8]) -> bool {
    data.iter()
        .all(|&c| (0x20..=0x7E).contains(&c) || c >= 0xA0 || c == b'\n' || c == b'\t')
}

/// Whether the payload is a valid ICCCM `UTF8_STRING`: well-formed UTF-8
/// with no control characters other than `\n` and `\t`.
pub fn is_icccm_utf8_string(data: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(data) else {
        return false;
    };
    text.chars()
        .all(|c| c == '\n' || c == '\t' || (c >= ' ' && c != '\x7F'))
}

#[cfg(test)]
mod tests {
    use super::{is_icccm_string, is_icccm_utf8_string};

    #[test]
    fn string_accepts_printable_latin1() {
        assert!(is_icccm_string(b"hello, world"));
        assert!(is_icccm_string(b"tab\there\nand a newline"));
        assert!(is_icccm_string(&[b'a', 0xA0, 0xFF, b'z']));
        assert!(is_icccm_string(b""));
    }

    #[test]
    fn string_rejects_controls_and_c1() {
        assert!(!is_icccm_string(b"carriage\rreturn"));
        assert!(!is_icccm_string(b"nul\0byte"));
        assert!(!is_icccm_string(&[0x7F]));
        assert!(!is_icccm_string(&[0x80]));
        assert!(!is_icccm_string(&[0x9F]));
    }

    #[test]
    fn utf8_accepts_multibyte() {
        assert!(is_icccm_utf8_string(b"hello"));
        assert!(is_icccm_utf8_string("héllo wörld".as_bytes()));
        assert!(is_icccm_utf8_string("文字列\n".as_bytes()));
        assert!(is_icccm_utf8_string("\u{10FFFF}".as_bytes()));
    }

    #[test]
    fn utf8_rejects_controls() {
        assert!(!is_icccm_utf8_string(b"bell\x07"));
        assert!(!is_icccm_utf8_string(b"\r\n"));
        assert!(!is_icccm_utf8_string(&[0x7F]));
        // U+0085 NEL is not \n or \t, but it is above U+001F and not DEL.
        assert!(is_icccm_utf8_string("\u{85}".as_bytes()));
    }

    #[test]
    fn utf8_rejects_malformed_sequences() {
        // Bare continuation byte.
        assert!(!is_icccm_utf8_string(&[0x80]));
        // Truncated two-byte sequence.
        assert!(!is_icccm_utf8_string(&[0xC3]));
        // Overlong encoding of '/'.
        assert!(!is_icccm_utf8_string(&[0xC0, 0xAF]));
        // UTF-16 surrogate half U+D800.
        assert!(!is_icccm_utf8_string(&[0xED, 0xA0, 0x80]));
        // Code point above U+10FFFF.
        assert!(!is_icccm_utf8_string(&[0xF4, 0x90, 0x80, 0x80]));
    }
}
