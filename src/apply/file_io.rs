//! Encoding-aware file IO for the apply engine.
//!
//! Read precedence: project override encoding, then UTF-8, then GBK,
//! then statistical detection. A detected encoding is only accepted when
//! strict (replacement-free) decoding succeeds; anything else is treated
//! as binary. Writes go back in the encoding the file was read with.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, GBK, UTF_8};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Read failure: IO or undecodable content.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Cannot detect encoding for file: {}", .0.display())]
    EncodingDetection(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads a text file, detecting its encoding.
///
/// # Errors
///
/// `ReadError::EncodingDetection` when no candidate encoding decodes the
/// bytes without replacement; `ReadError::Io` on filesystem errors.
pub fn read_text_with_fallback(
    path: &Path,
    override_encoding: Option<&str>,
) -> Result<(String, &'static Encoding), ReadError> {
    let raw = std::fs::read(path)?;

    // NUL bytes never appear in text under any supported encoding.
    if raw.contains(&0) {
        return Err(ReadError::EncodingDetection(path.to_path_buf()));
    }

    let mut candidates: Vec<&'static Encoding> = Vec::with_capacity(3);
    if let Some(label) = override_encoding {
        if let Some(enc) = Encoding::for_label(label.as_bytes()) {
            candidates.push(enc);
        } else {
            tracing::warn!("unknown encoding label {label:?}, ignoring override");
        }
    }
    candidates.push(UTF_8);
    candidates.push(GBK);

    for encoding in candidates {
        if let Some(content) = decode_strict(encoding, &raw) {
            return Ok((content, encoding));
        }
    }

    // Statistical fallback for everything the fast path missed. The
    // guessed decode must both be replacement-free and look like text;
    // single-byte decoders accept any byte sequence, so a coherence
    // check on control characters is what actually rejects binaries.
    let mut detector = EncodingDetector::new();
    detector.feed(&raw, true);
    let guessed = detector.guess(None, true);
    decode_strict(guessed, &raw)
        .filter(|content| is_coherent_text(content))
        .map(|content| (content, guessed))
        .ok_or_else(|| ReadError::EncodingDetection(path.to_path_buf()))
}

fn decode_strict(encoding: &'static Encoding, raw: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(raw)
        .map(std::borrow::Cow::into_owned)
}

/// Coherence gate for detected encodings: at least half of the decoded
/// characters must be ordinary text (not C0/C1 controls).
fn is_coherent_text(content: &str) -> bool {
    let mut total = 0usize;
    let mut control = 0usize;
    for ch in content.chars() {
        total += 1;
        if (ch.is_control() && !matches!(ch, '\t' | '\n' | '\r')) || ('\u{80}'..='\u{9f}').contains(&ch)
        {
            control += 1;
        }
    }
    total == 0 || control * 2 < total
}

/// Writes `content` atomically in the given encoding.
///
/// The content lands in a `<name>.tmp` sibling first and is renamed over
/// the target; on any failure the temporary file is removed and the
/// original is untouched.
///
/// # Errors
///
/// Propagates the underlying filesystem error.
pub fn atomic_write(path: &Path, content: &str, encoding: &'static Encoding) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let (bytes, _, _) = encoding.encode(content);
    let result = std::fs::write(&tmp_path, bytes.as_ref()).and_then(|()| {
        std::fs::rename(&tmp_path, path)
    });
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

/// Copies the pre-edit file to `<backup_dir>/<trace_id>/<basename>`.
///
/// Failures are logged and swallowed; backups must never block an edit.
pub fn backup_file(path: &Path, trace_id: &str, backup_dir: &Path) -> Option<PathBuf> {
    if !path.exists() {
        return None;
    }
    let file_name = path.file_name()?;
    let target_dir = backup_dir.join(trace_id);
    let backup_path = target_dir.join(file_name);
    let result = std::fs::create_dir_all(&target_dir)
        .and_then(|()| std::fs::copy(path, &backup_path));
    match result {
        Ok(_) => {
            tracing::info!(
                "[{trace_id}] Backed up {} to {}",
                path.display(),
                backup_path.display()
            );
            Some(backup_path)
        }
        Err(e) => {
            tracing::warn!("[{trace_id}] Failed to backup {}: {e}", path.display());
            None
        }
    }
}

/// Whether the target file accepts writes.
#[must_use]
pub fn is_writable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello \u{4f60}\u{597d}\n").unwrap();

        let (content, encoding) = read_text_with_fallback(&path, None).unwrap();
        assert_eq!(content, "hello \u{4f60}\u{597d}\n");
        assert_eq!(encoding, UTF_8);
    }

    #[test]
    fn test_read_gbk_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gbk.txt");
        let (bytes, _, _) = GBK.encode("\u{4f60}\u{597d}\u{4e16}\u{754c}");
        // GBK bytes for CJK text are not valid UTF-8.
        std::fs::write(&path, bytes.as_ref()).unwrap();

        let (content, encoding) = read_text_with_fallback(&path, None).unwrap();
        assert_eq!(content, "\u{4f60}\u{597d}\u{4e16}\u{754c}");
        assert_eq!(encoding, GBK);
    }

    #[test]
    fn test_override_encoding_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latin.txt");
        std::fs::write(&path, b"caf\xe9\n").unwrap();

        let (content, _) = read_text_with_fallback(&path, Some("windows-1252")).unwrap();
        assert_eq!(content, "caf\u{e9}\n");
    }

    #[test]
    fn test_binary_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [0x7fu8, 0x45, 0x4c, 0x46, 0x00, 0x01, 0x02]).unwrap();

        assert!(matches!(
            read_text_with_fallback(&path, None),
            Err(ReadError::EncodingDetection(_))
        ));
    }

    #[test]
    fn test_coherence_gate() {
        assert!(is_coherent_text("fn main() {}\n"));
        assert!(is_coherent_text(""));
        let noisy: String = ('\u{80}'..='\u{9f}').collect();
        assert!(!is_coherent_text(&noisy));
    }

    #[test]
    fn test_atomic_write_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.py");
        atomic_write(&path, "print('hi')\n", UTF_8).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "print('hi')\n");
        // No temporary file left behind.
        assert!(!dir.path().join("out.py.tmp").exists());
    }

    #[test]
    fn test_atomic_write_gbk_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        atomic_write(&path, "\u{4f60}\u{597d}", GBK).unwrap();
        let (content, encoding) = read_text_with_fallback(&path, None).unwrap();
        assert_eq!(content, "\u{4f60}\u{597d}");
        assert_eq!(encoding, GBK);
    }

    #[test]
    fn test_backup_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "original").unwrap();
        let backups = dir.path().join("backups");

        let backup = backup_file(&path, "abc123", &backups).unwrap();
        assert_eq!(backup, backups.join("abc123").join("a.txt"));
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "original");
    }
}
