//! Binary input classification.
//!
//! Two probes decide whether an input is treated as binary: a NUL scan
//! over each freshly filled window, and a per-line encoding check run on
//! matched lines just before they would be printed. What happens on a
//! positive probe is the `--binary-files` policy, applied by the scanner.

use memchr::memchr;

/// How to treat inputs classified as binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryMode {
    /// Suppress line output; report `Binary file X matches` at the end.
    #[default]
    Binary,
    /// Pretend the input is text.
    Text,
    /// Abandon the file and report no matches.
    WithoutMatch,
}

/// NUL probe over a window of input.
pub fn has_nulls(buf: &[u8]) -> bool {
    memchr(0, buf).is_some()
}

/// Encoding probe for one line (without its end-of-line byte): true when
/// the bytes do not decode cleanly, including a truncated sequence at the
/// end of the line.
pub fn line_has_encoding_error(line: &[u8]) -> bool {
    std::str::from_utf8(line).is_err()
}

/// Replaces every NUL in `buf` with the end-of-line byte, so that long
/// NUL runs in binary input keep line structure instead of accreting into
/// one enormous line. No-op when NUL itself is the line terminator.
pub fn zap_nuls(buf: &mut [u8], eol: u8) {
    if eol == 0 {
        return;
    }
    let mut pos = 0;
    while let Some(i) = memchr(0, &buf[pos..]) {
        buf[pos + i] = eol;
        pos += i + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nul_probe() {
        assert!(!has_nulls(b"plain text\n"));
        assert!(has_nulls(b"a\0b\n"));
        assert!(has_nulls(b"\0"));
        assert!(!has_nulls(b""));
    }

    #[test]
    fn test_encoding_probe() {
        assert!(!line_has_encoding_error(b"ascii"));
        assert!(!line_has_encoding_error("héllo".as_bytes()));
        // Lone continuation byte.
        assert!(line_has_encoding_error(b"bad \x80 byte"));
        // Sequence truncated at end of line.
        assert!(line_has_encoding_error(b"trunc \xc3"));
    }

    #[test]
    fn test_zap_nuls() {
        let mut buf = b"a\0b\0\0c".to_vec();
        zap_nuls(&mut buf, b'\n');
        assert_eq!(buf, b"a\nb\n\nc");
    }

    #[test]
    fn test_zap_nuls_null_data_mode() {
        let mut buf = b"a\0b".to_vec();
        zap_nuls(&mut buf, 0);
        assert_eq!(buf, b"a\0b");
    }
}
