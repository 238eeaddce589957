//! Offset-addressed reads over text or binary files.

use std::io::SeekFrom;

use filesys_types::{OffsetSpec, OffsetUnit, SourceExtensions, TransportFormat};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::ToolError;
use super::codec::{self, Encoded};
use super::sandbox::ResolvedPath;

/// Outcome of a range read, already encoded for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub content: String,
    pub format: TransportFormat,
    pub binary: bool,
    /// Unit actually applied; binary files always read bytes.
    pub unit: OffsetUnit,
    pub line_numbers: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadRequest {
    pub spec: OffsetSpec,
    pub format: TransportFormat,
    /// `None` means on for source files, off otherwise.
    pub line_numbers: Option<bool>,
}

/// Check that `path` is an existing regular file no larger than `max_bytes`.
pub async fn check_regular_file(path: &ResolvedPath, max_bytes: u64) -> Result<u64, ToolError> {
    let meta = tokio::fs::metadata(path.as_path())
        .await
        .map_err(|e| ToolError::from_io(path, e))?;
    if meta.is_dir() {
        return Err(ToolError::NotAFile {
            path: path.display_relative(),
        });
    }
    if meta.len() > max_bytes {
        return Err(ToolError::TooLarge {
            path: path.display_relative(),
            size: meta.len(),
            max: max_bytes,
        });
    }
    Ok(meta.len())
}

/// Split text into lines, keeping each line's `\n` terminator.
#[must_use]
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Prefix each line with a right-aligned 1-based number: `" 9| text"`.
///
/// Lines keep their own terminators, so a missing final newline stays missing.
#[must_use]
pub fn format_with_line_numbers(lines: &[&str], first_line: usize) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let width = (first_line + lines.len() - 1).to_string().len();
    let mut out = String::with_capacity(lines.iter().map(|l| l.len() + width + 2).sum());
    for (i, line) in lines.iter().enumerate() {
        out.push_str(&format!("{:>width$}| {line}", first_line + i));
    }
    out
}

pub async fn read_range(
    path: &ResolvedPath,
    request: ReadRequest,
    extensions: &SourceExtensions,
    max_bytes: u64,
) -> Result<ReadOutcome, ToolError> {
    check_regular_file(path, max_bytes).await?;

    let binary = codec::is_binary_file(path.as_path())
        .await
        .map_err(|e| ToolError::from_io(path, e))?;
    let spec = if binary {
        request.spec.with_unit(OffsetUnit::Byte)
    } else {
        request.spec
    };

    if spec.unit == OffsetUnit::Byte {
        let bytes = read_byte_range(path, spec).await?;
        return Ok(outcome(codec::encode(&bytes, request.format, binary), binary, spec.unit, false));
    }

    let bytes = tokio::fs::read(path.as_path())
        .await
        .map_err(|e| ToolError::from_io(path, e))?;
    let Ok(text) = String::from_utf8(bytes) else {
        // Sniff passed but the full body is not UTF-8: serve it as bytes.
        tracing::debug!(path = %path, "Full decode failed, falling back to byte range");
        let spec = spec.with_unit(OffsetUnit::Byte);
        let bytes = read_byte_range(path, spec).await?;
        return Ok(outcome(codec::encode(&bytes, request.format, true), true, spec.unit, false));
    };

    let (selected, numbered) = match spec.unit {
        OffsetUnit::Line => {
            let lines = split_lines(&text);
            let range = spec.clamped(lines.len());
            let first_line = range.start + 1;
            let slice = &lines[range];
            let numbered = request
                .line_numbers
                .unwrap_or_else(|| extensions.is_source(path.as_path()));
            if numbered {
                (format_with_line_numbers(slice, first_line), true)
            } else {
                (slice.concat(), false)
            }
        }
        OffsetUnit::Char | OffsetUnit::Byte => {
            let count = text.chars().count();
            let range = spec.clamped(count);
            let selected: String = text.chars().skip(range.start).take(range.len()).collect();
            (selected, false)
        }
    };

    Ok(outcome(
        codec::encode(selected.as_bytes(), request.format, false),
        false,
        spec.unit,
        numbered,
    ))
}

fn outcome(encoded: Encoded, binary: bool, unit: OffsetUnit, line_numbers: bool) -> ReadOutcome {
    ReadOutcome {
        content: encoded.content,
        format: encoded.format,
        binary,
        unit,
        line_numbers,
    }
}

/// Seek to `start` and read `end - start + 1` bytes, or to EOF.
async fn read_byte_range(path: &ResolvedPath, spec: OffsetSpec) -> Result<Vec<u8>, ToolError> {
    let io_err = |e| ToolError::from_io(path, e);
    let mut file = tokio::fs::File::open(path.as_path()).await.map_err(io_err)?;
    if spec.start > 0 {
        file.seek(SeekFrom::Start(spec.start as u64))
            .await
            .map_err(io_err)?;
    }
    let mut buf = Vec::new();
    match spec.end {
        None => {
            file.read_to_end(&mut buf).await.map_err(io_err)?;
        }
        Some(end) if end < spec.start => {}
        Some(end) => {
            let len = (end - spec.start + 1) as u64;
            file.take(len).read_to_end(&mut buf).await.map_err(io_err)?;
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Sandbox;
    use filesys_types::ProtectedDirectorySet;
    use tempfile::tempdir;

    fn request(unit: OffsetUnit, start: i64, end: i64) -> ReadRequest {
        ReadRequest {
            spec: OffsetSpec::from_wire(unit, start, end).unwrap(),
            format: TransportFormat::RawUtf8,
            line_numbers: Some(false),
        }
    }

    async fn read(dir: &std::path::Path, name: &str, req: ReadRequest) -> Result<ReadOutcome, ToolError> {
        let sb = Sandbox::new(dir, ProtectedDirectorySet::default()).unwrap();
        let path = sb.resolve(name).unwrap();
        read_range(&path, req, &SourceExtensions::default(), 1024 * 1024).await
    }

    #[test]
    fn line_numbers_pad_to_widest() {
        let lines = ["a\n", "b"];
        assert_eq!(format_with_line_numbers(&lines, 99), " 99| a\n100| b");
        assert_eq!(format_with_line_numbers(&["x\n"], 1), "1| x\n");
        assert_eq!(format_with_line_numbers(&[], 1), "");
    }

    #[test]
    fn split_lines_keeps_terminators() {
        assert_eq!(split_lines("a\r\nb\nc"), vec!["a\r\n", "b\n", "c"]);
        assert!(split_lines("").is_empty());
    }

    #[tokio::test]
    async fn line_range_is_inclusive() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "zero\none\ntwo\nthree\n").unwrap();

        let out = read(dir.path(), "f.txt", request(OffsetUnit::Line, 1, 2)).await.unwrap();
        assert_eq!(out.content, "one\ntwo\n");
        let out = read(dir.path(), "f.txt", request(OffsetUnit::Line, 2, -1)).await.unwrap();
        assert_eq!(out.content, "two\nthree\n");
        let out = read(dir.path(), "f.txt", request(OffsetUnit::Line, 10, -1)).await.unwrap();
        assert_eq!(out.content, "");
    }

    #[tokio::test]
    async fn char_and_byte_ranges() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "héllo wörld").unwrap();

        let out = read(dir.path(), "f.txt", request(OffsetUnit::Char, 1, 4)).await.unwrap();
        assert_eq!(out.content, "éllo");
        let out = read(dir.path(), "f.txt", request(OffsetUnit::Byte, 0, 0)).await.unwrap();
        assert_eq!(out.content, "h");
        assert_eq!(out.unit, OffsetUnit::Byte);
    }

    #[tokio::test]
    async fn source_files_get_line_numbers_by_default() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "plain\n").unwrap();

        let mut req = request(OffsetUnit::Line, 0, -1);
        req.line_numbers = None;
        let out = read(dir.path(), "main.rs", req).await.unwrap();
        assert!(out.line_numbers);
        assert_eq!(out.content, "1| fn main() {}\n");

        let out = read(dir.path(), "notes.txt", req).await.unwrap();
        assert!(!out.line_numbers);
        assert_eq!(out.content, "plain\n");
    }

    #[tokio::test]
    async fn binary_files_force_byte_unit_and_base64() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0u8, 1, 2, 3, 4, 5]).unwrap();

        let out = read(dir.path(), "blob.bin", request(OffsetUnit::Line, 1, 3)).await.unwrap();
        assert!(out.binary);
        assert_eq!(out.unit, OffsetUnit::Byte);
        assert_eq!(out.format, TransportFormat::Base64);
        assert_eq!(out.content, "AQID");
    }

    #[tokio::test]
    async fn invalid_utf8_after_sniff_window_is_served_as_bytes() {
        let dir = tempdir().unwrap();
        let mut bytes = vec![b'a'; codec::SNIFF_BYTES + 10];
        bytes.push(0xff);
        std::fs::write(dir.path().join("late.txt"), &bytes).unwrap();

        let out = read(dir.path(), "late.txt", request(OffsetUnit::Line, 0, -1)).await.unwrap();
        assert!(out.binary);
        assert_eq!(out.format, TransportFormat::Base64);
    }

    #[tokio::test]
    async fn missing_directory_and_oversized_fail() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(64)).unwrap();
        let sb = Sandbox::new(dir.path(), ProtectedDirectorySet::default()).unwrap();
        let ext = SourceExtensions::default();
        let req = request(OffsetUnit::Line, 0, -1);

        let err = read_range(&sb.resolve("nope.txt").unwrap(), req, &ext, 1024).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
        let err = read_range(&sb.resolve("sub").unwrap(), req, &ext, 1024).await.unwrap_err();
        assert_eq!(err.kind(), "not_a_file");
        let err = read_range(&sb.resolve("big.txt").unwrap(), req, &ext, 10).await.unwrap_err();
        assert_eq!(err.kind(), "too_large");
    }
}
