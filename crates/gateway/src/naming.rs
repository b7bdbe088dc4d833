//! # Blob名とContent-Type
//!
//! アップロードされたファイル名からBlob名を導出し、拡張子からContent-Typeを決定する。

use std::path::Path;

/// 拡張子が未知の場合のContent-Type
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// サニタイズ後に空になったファイル名の代替
pub const UNNAMED_FILE: &str = "unnamed";

/// Blob Storageが受け付けるBlob名の最大長
pub const MAX_BLOB_NAME_LEN: usize = 1024;

/// `[A-Za-z0-9.-]` 以外の文字をすべて `_` に置換する。
///
/// 冪等かつ全域。空文字列は [`UNNAMED_FILE`] になる。
pub fn sanitize_file_name(file_name: &str) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        UNNAMED_FILE.to_string()
    } else {
        sanitized
    }
}

/// `{unix-millis}-{sanitized}` 形式のBlob名を導出する。
///
/// 同一ミリ秒内の同名アップロードは衝突し得るが、検出もリトライもしない。
pub fn blob_name(timestamp_millis: u64, file_name: &str) -> String {
    format!("{timestamp_millis}-{}", sanitize_file_name(file_name))
}

/// 拡張子（大文字小文字を区別しない）からContent-Typeを決定する。
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        // テキスト
        Some("txt") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js" | "mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("csv") => "text/csv",
        Some("md") => "text/markdown",
        // ドキュメント
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        // アーカイブ
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("tar") => "application/x-tar",
        Some("7z") => "application/x-7z-compressed",
        // 画像
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        Some("ico") => "image/x-icon",
        Some("tif" | "tiff") => "image/tiff",
        // 音声・動画
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `^[0-9]+-[A-Za-z0-9._-]+$` に一致するか
    fn is_valid_blob_name(name: &str) -> bool {
        let Some((ts, rest)) = name.split_once('-') else {
            return false;
        };
        !ts.is_empty()
            && ts.chars().all(|c| c.is_ascii_digit())
            && !rest.is_empty()
            && rest
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    }

    #[test]
    fn test_sanitize_replaces_disallowed_characters() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("my file (1).PNG"), "my_file__1_.PNG");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("a_b-c.d"), "a_b-c.d");
        assert_eq!(sanitize_file_name("日本語.txt"), "___.txt");
        assert_eq!(sanitize_file_name("🚀"), "_");
    }

    #[test]
    fn test_sanitize_empty_name() {
        assert_eq!(sanitize_file_name(""), UNNAMED_FILE);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            "",
            "plain.txt",
            "with space.txt",
            "tab\tand\nnewline",
            "quote\"s'.csv",
            "ünïcödé-名前.tar.gz",
            "?&=#%",
            "--..__",
        ];
        for input in inputs {
            let once = sanitize_file_name(input);
            assert_eq!(sanitize_file_name(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn test_blob_name_matches_pattern() {
        let inputs = ["", "report.pdf", "a b c", "ファイル", "x/y\\z", ".hidden", "-"];
        for input in inputs {
            let name = blob_name(1_700_000_000_123, input);
            assert!(is_valid_blob_name(&name), "{name:?} from {input:?}");
        }
        assert_eq!(blob_name(1_700_000_000_123, "a b.txt"), "1700000000123-a_b.txt");
    }

    /// タイムスタンプが1ミリ秒でも異なれば別のBlob名になる
    #[test]
    fn test_blob_name_differs_by_timestamp() {
        let a = blob_name(1_700_000_000_000, "same.txt");
        let b = blob_name(1_700_000_000_001, "same.txt");
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_type_lookup() {
        assert_eq!(content_type_for("photo.JPG"), "image/jpeg");
        assert_eq!(content_type_for("photo.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("doc.pdf"), "application/pdf");
        assert_eq!(content_type_for("archive.tar.gz"), "application/gzip");
        assert_eq!(content_type_for("notes.txt"), "text/plain");
        assert_eq!(content_type_for("data.json"), "application/json");
    }

    #[test]
    fn test_content_type_fallback() {
        assert_eq!(content_type_for("binary.xyz"), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for("Makefile"), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(".bashrc"), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(""), DEFAULT_CONTENT_TYPE);
    }
}
