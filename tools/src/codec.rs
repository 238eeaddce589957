//! Content transport codec: raw UTF-8, base64, and quoted-printable.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use filesys_types::{TransportFormat, is_supported_encoding};
use tokio::io::AsyncReadExt;

use super::ToolError;

/// Leading bytes inspected by the binary sniff.
pub const SNIFF_BYTES: usize = 8192;

/// Maximum encoded line length for quoted-printable output.
const QP_MAX_LINE: usize = 76;

/// Encoded content plus the format actually used.
///
/// `format` differs from the requested one when raw output of binary
/// content fell back to base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub content: String,
    pub format: TransportFormat,
}

pub fn parse_format(raw: Option<&str>) -> Result<TransportFormat, ToolError> {
    match raw {
        None => Ok(TransportFormat::RawUtf8),
        Some(name) => TransportFormat::parse(name).map_err(|e| ToolError::UnsupportedFormat {
            message: e.to_string(),
        }),
    }
}

pub fn check_encoding(raw: Option<&str>) -> Result<(), ToolError> {
    match raw {
        Some(name) if !is_supported_encoding(name) => Err(ToolError::UnsupportedFormat {
            message: format!("unsupported file encoding '{name}' (only utf-8 is supported)"),
        }),
        _ => Ok(()),
    }
}

/// NUL byte, or invalid UTF-8 that is not just a truncated trailing sequence.
#[must_use]
pub fn sniff_binary(prefix: &[u8]) -> bool {
    if prefix.contains(&0) {
        return true;
    }
    match std::str::from_utf8(prefix) {
        Ok(_) => false,
        Err(e) => e.error_len().is_some(),
    }
}

/// Sniff the leading bytes of a file. A missing file counts as text.
pub async fn is_binary_file(path: &Path) -> std::io::Result<bool> {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let mut prefix = Vec::with_capacity(SNIFF_BYTES);
    file.take(SNIFF_BYTES as u64).read_to_end(&mut prefix).await?;
    Ok(sniff_binary(&prefix))
}

/// Encode bytes for the response.
///
/// Raw output of binary (or non-UTF-8) bytes is substituted with base64
/// rather than decoded lossily.
#[must_use]
pub fn encode(bytes: &[u8], format: TransportFormat, binary: bool) -> Encoded {
    match format {
        TransportFormat::RawUtf8 if !binary => match std::str::from_utf8(bytes) {
            Ok(text) => Encoded {
                content: text.to_string(),
                format,
            },
            Err(_) => base64_encoded(bytes),
        },
        TransportFormat::RawUtf8 | TransportFormat::Base64 => base64_encoded(bytes),
        TransportFormat::QuotedPrintable => Encoded {
            content: qp_encode(bytes),
            format,
        },
    }
}

fn base64_encoded(bytes: &[u8]) -> Encoded {
    Encoded {
        content: STANDARD.encode(bytes),
        format: TransportFormat::Base64,
    }
}

/// Decode a request payload into the bytes to persist.
pub fn decode(payload: &str, format: TransportFormat) -> Result<Vec<u8>, ToolError> {
    match format {
        TransportFormat::RawUtf8 => Ok(payload.as_bytes().to_vec()),
        TransportFormat::Base64 => {
            let compact: String = payload
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            STANDARD.decode(compact).map_err(|e| ToolError::BadArgs {
                message: format!("invalid base64 content: {e}"),
            })
        }
        TransportFormat::QuotedPrintable => qp_decode(payload),
    }
}

// ============================================================================
// Quoted-printable
// ============================================================================

fn qp_needs_quoting(byte: u8) -> bool {
    byte == b'=' || (!(b' '..=b'~').contains(&byte) && byte != b'\t')
}

fn qp_escape(byte: u8) -> String {
    format!("={byte:02X}")
}

/// MIME quoted-printable with soft breaks at 76 columns.
#[must_use]
pub fn qp_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + bytes.len() / 8);
    let mut lines = bytes.split(|&b| b == b'\n').peekable();

    while let Some(line) = lines.next() {
        let mut column = 0;
        for (idx, &byte) in line.iter().enumerate() {
            let trailing_ws = idx + 1 == line.len() && (byte == b' ' || byte == b'\t');
            let token = if trailing_ws || qp_needs_quoting(byte) {
                qp_escape(byte)
            } else {
                char::from(byte).to_string()
            };
            if column + token.len() > QP_MAX_LINE - 1 {
                out.push_str("=\n");
                column = 0;
            }
            column += token.len();
            out.push_str(&token);
        }
        if lines.peek().is_some() {
            out.push('\n');
        }
    }
    out
}

/// Decode quoted-printable text.
///
/// Unquoted trailing whitespace before a hard break is dropped, `=` at the
/// end of a line is a soft break, and malformed escapes are kept literally.
pub fn qp_decode(payload: &str) -> Result<Vec<u8>, ToolError> {
    if !payload.is_ascii() {
        return Err(ToolError::BadArgs {
            message: "quoted-printable content must be ASCII".to_string(),
        });
    }

    let mut out = Vec::with_capacity(payload.len());
    let mut pending: Vec<u8> = Vec::new();

    for raw_line in payload.as_bytes().split_inclusive(|&b| b == b'\n') {
        let (mut line, hard_break) = match raw_line.strip_suffix(b"\n") {
            Some(body) => (body, true),
            None => (raw_line, false),
        };
        if hard_break {
            while let [rest @ .., b' ' | b'\t' | b'\r'] = line {
                line = rest;
            }
        }

        let mut soft_break = !hard_break;
        let mut i = 0;
        let n = line.len();
        while i < n {
            let c = line[i];
            if c != b'=' {
                pending.push(c);
                i += 1;
            } else if i + 1 == n && hard_break {
                soft_break = true;
                break;
            } else if i + 1 < n && line[i + 1] == b'=' {
                pending.push(b'=');
                i += 2;
            } else if let Some(byte) = line
                .get(i + 1..i + 3)
                .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                pending.push(byte);
                i += 3;
            } else {
                pending.push(c);
                i += 1;
            }
        }

        if !soft_break {
            out.append(&mut pending);
            out.push(b'\n');
        }
    }
    out.append(&mut pending);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_detects_nul_and_invalid_utf8() {
        assert!(sniff_binary(b"abc\0def"));
        assert!(sniff_binary(&[0xff, 0xfe, b'a']));
        assert!(!sniff_binary(b"plain text\n"));
        assert!(!sniff_binary("héllo".as_bytes()));
    }

    #[test]
    fn sniff_tolerates_cut_multibyte_sequence() {
        let bytes = "é".as_bytes();
        assert!(!sniff_binary(&bytes[..1]));
    }

    #[tokio::test]
    async fn missing_file_sniffs_as_text() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_binary_file(&dir.path().join("nope")).await.unwrap());
    }

    #[test]
    fn raw_output_of_binary_falls_back_to_base64() {
        let encoded = encode(&[0, 1, 2, 0xff], TransportFormat::RawUtf8, true);
        assert_eq!(encoded.format, TransportFormat::Base64);
        assert_eq!(encoded.content, "AAEC/w==");

        let encoded = encode(&[0xc3, 0x28], TransportFormat::RawUtf8, false);
        assert_eq!(encoded.format, TransportFormat::Base64);
    }

    #[test]
    fn raw_output_of_text_is_identity() {
        let encoded = encode("héllo".as_bytes(), TransportFormat::RawUtf8, false);
        assert_eq!(encoded.content, "héllo");
        assert_eq!(encoded.format, TransportFormat::RawUtf8);
    }

    #[test]
    fn base64_decode_ignores_whitespace() {
        let bytes = decode("aGVs\nbG8=\n", TransportFormat::Base64).unwrap();
        assert_eq!(bytes, b"hello");
        assert!(decode("!!!", TransportFormat::Base64).is_err());
    }

    #[test]
    fn qp_encodes_specials_and_trailing_space() {
        assert_eq!(qp_encode(b"a=b"), "a=3Db");
        assert_eq!(qp_encode(b"tab\there"), "tab\there");
        assert_eq!(qp_encode(b"end \nnext\t"), "end=20\nnext=09");
        assert_eq!(qp_encode("é".as_bytes()), "=C3=A9");
        assert_eq!(qp_encode(b"crlf\r\n"), "crlf=0D\n");
    }

    #[test]
    fn qp_soft_breaks_keep_lines_short() {
        let long = "x".repeat(200);
        let encoded = qp_encode(long.as_bytes());
        assert!(encoded.lines().all(|line| line.len() <= QP_MAX_LINE));
        assert!(encoded.contains("=\n"));
        assert_eq!(qp_decode(&encoded).unwrap(), long.as_bytes());
    }

    #[test]
    fn qp_soft_break_never_splits_escape() {
        let data = vec![0xffu8; 60];
        let encoded = qp_encode(&data);
        for line in encoded.lines() {
            let body = line.strip_suffix('=').unwrap_or(line);
            assert_eq!(body.len() % 3, 0, "split escape in {line:?}");
        }
        assert_eq!(qp_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn qp_decode_handles_soft_breaks_and_bad_escapes() {
        assert_eq!(qp_decode("foo=\nbar").unwrap(), b"foobar");
        assert_eq!(qp_decode("a==b").unwrap(), b"a=b");
        assert_eq!(qp_decode("=ZZ").unwrap(), b"=ZZ");
        assert_eq!(qp_decode("trail   \nx").unwrap(), b"trail\nx");
        assert_eq!(qp_decode("end=").unwrap(), b"end=");
        assert!(qp_decode("héllo").is_err());
    }

    #[test]
    fn codec_round_trips_arbitrary_bytes() {
        let samples: Vec<Vec<u8>> = vec![
            Vec::new(),
            b"hello world\n".to_vec(),
            b"  leading and trailing  \n\t\n".to_vec(),
            (0u8..=255).collect(),
            "unicode ✓ text\r\nwith crlf\r\n".as_bytes().to_vec(),
            b"=".repeat(100),
            b"\n\n\n".to_vec(),
        ];
        for bytes in samples {
            for format in [TransportFormat::Base64, TransportFormat::QuotedPrintable] {
                let encoded = encode(&bytes, format, false);
                assert_eq!(
                    decode(&encoded.content, format).unwrap(),
                    bytes,
                    "{format:?} round trip failed"
                );
            }
        }
    }

    #[test]
    fn unknown_format_and_encoding_are_unsupported() {
        assert_eq!(parse_format(Some("rot13")).unwrap_err().kind(), "unsupported_format");
        assert_eq!(parse_format(Some("quoted-printable")).unwrap(), TransportFormat::QuotedPrintable);
        assert!(check_encoding(Some("UTF-8")).is_ok());
        assert!(check_encoding(None).is_ok());
        assert_eq!(check_encoding(Some("latin-1")).unwrap_err().kind(), "unsupported_format");
    }
}
