//! File-path encoders for the URI and file-manager clipboard targets.

fn is_unreserved(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'/' | b'.' | b'_' | b'-' | b'~')
}

fn encode_into(path: &[u8], out: &mut Vec<u8>) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for &c in path {
        if is_unreserved(c) {
            out.push(c);
        } else {
            out.push(b'%');
            out.push(HEX[usize::from(c >> 4)]);
            out.push(HEX[usize::from(c & 0xF)]);
        }
    }
}

/// `file://` URI line for a `text/uri-list` transfer, CRLF terminated.
pub fn to_uri(path: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(path.len() + 16);
    out.extend_from_slice(b"file://");
    encode_into(path, &mut out);
    out.extend_from_slice(b"\r\n");
    out
}

/// The `x-special/*-copied-files` payload understood by GNOME, KDE, MATE,
/// and Nautilus file managers: a copy verb followed by the file URI, with
/// no trailing newline.
pub fn to_file_manager_clipboard_format(path: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(path.len() + 16);
    out.extend_from_slice(b"copy\nfile://");
    encode_into(path, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::{to_file_manager_clipboard_format, to_uri};

    #[test]
    fn uri_plain_path() {
        assert_eq!(to_uri(b"/tmp/x"), b"file:///tmp/x\r\n");
    }

    #[test]
    fn uri_escapes_with_uppercase_hex() {
        assert_eq!(to_uri(b"/tmp/a b"), b"file:///tmp/a%20b\r\n");
        assert_eq!(to_uri(b"/x\xFF"), b"file:///x%FF\r\n");
        assert_eq!(to_uri(b"/100%"), b"file:///100%25\r\n");
    }

    #[test]
    fn uri_passes_unreserved_set() {
        assert_eq!(
            to_uri(b"/home/user/a-b_c.d~e/0Z9"),
            b"file:///home/user/a-b_c.d~e/0Z9\r\n"
        );
    }

    #[test]
    fn file_manager_format() {
        assert_eq!(
            to_file_manager_clipboard_format(b"/tmp/x"),
            b"copy\nfile:///tmp/x"
        );
        assert_eq!(
            to_file_manager_clipboard_format(b"/a b"),
            b"copy\nfile:///a%20b"
        );
    }
}
