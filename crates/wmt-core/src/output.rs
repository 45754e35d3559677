//! Local output sink: dated, slugged analysis files written atomically.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::pipeline::{ContentSink, SinkError, StoredDocument};
use crate::publish;

/// Lowercases, strips apostrophes, and collapses non-alphanumerics to
/// single dashes. Empty input slugs to `untitled`.
#[must_use]
pub fn slugify(value: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.trim().chars() {
        if ch == '\'' || ch == '\u{2019}' {
            continue;
        }
        let lowered = ch.to_ascii_lowercase();
        if lowered.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(lowered);
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(max_len);
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Builds the output filename: `YYYY-MM-DD--<slug>--<short-id>.md`.
#[must_use]
pub fn triage_output_filename(
    title: Option<&str>,
    added_at: Option<DateTime<Utc>>,
    short_id: &str,
) -> String {
    let date_prefix = added_at.unwrap_or_else(Utc::now).format("%Y-%m-%d");
    let slug = slugify(title.unwrap_or(""), 80);
    let short: String = short_id
        .chars()
        .filter(char::is_ascii_hexdigit)
        .take(10)
        .collect::<String>()
        .to_ascii_lowercase();
    let short = if short.is_empty() {
        short_id.chars().take(10).collect()
    } else {
        short
    };
    format!("{date_prefix}--{slug}--{short}.md")
}

/// Writes text to `path` atomically (temp file in the same directory, then
/// rename), creating parent directories as needed. The text is normalized
/// to end with exactly one newline.
///
/// # Errors
///
/// Returns [`SinkError::Write`] on any I/O failure.
pub fn atomic_write_text(path: &Path, text: &str) -> Result<(), SinkError> {
    let write_error = |detail: String| SinkError::Write {
        path: path.to_path_buf(),
        detail,
    };

    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&parent)
        .map_err(|err| write_error(format!("failed to create output directory: {err}")))?;

    let mut temp = tempfile::NamedTempFile::new_in(&parent)
        .map_err(|err| write_error(format!("failed to create temp file: {err}")))?;
    temp.write_all(text.trim_end_matches('\n').as_bytes())
        .and_then(|()| temp.write_all(b"\n"))
        .map_err(|err| write_error(format!("failed to write temp file: {err}")))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| write_error(format!("failed to sync temp file: {err}")))?;
    temp.persist(path)
        .map_err(|err| write_error(format!("failed to persist output: {err}")))?;
    Ok(())
}

/// Production sink: local markdown file first, then configured remote
/// publishers. A publisher failure fails the store - a generated but
/// unpublished result must be recorded, not silently dropped.
pub struct TriageOutputSink<'a> {
    cfg: &'a AppConfig,
}

impl<'a> TriageOutputSink<'a> {
    /// Sink writing under the configured output directory.
    #[must_use]
    pub fn new(cfg: &'a AppConfig) -> Self {
        Self { cfg }
    }
}

impl ContentSink for TriageOutputSink<'_> {
    fn store(
        &self,
        title: &str,
        item_id: &str,
        markdown: &str,
    ) -> Result<StoredDocument, SinkError> {
        let filename = triage_output_filename(Some(title), None, item_id);
        let path = self.cfg.paths.output_dir.join(filename);
        info!(output = %path.display(), "writing analysis");
        atomic_write_text(&path, markdown)?;

        for result in publish::publish_all(self.cfg, markdown) {
            if result.ok {
                info!(
                    publisher = result.publisher,
                    url = result.url.as_deref().unwrap_or("ok"),
                    "published"
                );
            } else {
                let detail = result.error.unwrap_or_else(|| "unknown error".to_string());
                warn!(publisher = result.publisher, %detail, "publish failed");
                return Err(SinkError::Publish {
                    publisher: result.publisher,
                    detail,
                });
            }
        }

        Ok(StoredDocument { path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_basics() {
        assert_eq!(slugify("Hello, World!", 80), "hello-world");
        assert_eq!(slugify("  It's  FINE  ", 80), "its-fine");
        assert_eq!(slugify("", 80), "untitled");
        assert_eq!(slugify("!!!", 80), "untitled");
    }

    #[test]
    fn slugify_respects_max_len() {
        let slug = slugify("a".repeat(200).as_str(), 10);
        assert_eq!(slug.len(), 10);
    }

    #[test]
    fn filename_shape() {
        let added = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = triage_output_filename(
            Some("A Great Talk"),
            Some(added),
            "deadbeef0123456789abcdef",
        );
        assert_eq!(name, "2026-03-01--a-great-talk--deadbeef01.md");
    }

    #[test]
    fn filename_with_non_hex_id_falls_back() {
        let added = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = triage_output_filename(None, Some(added), "zzzz");
        assert_eq!(name, "2026-03-01--untitled--zzzz.md");
    }

    #[test]
    fn atomic_write_creates_dirs_and_normalizes_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/dir/out.md");
        atomic_write_text(&path, "# Doc\n\n\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "# Doc\n");
    }

    #[test]
    fn sink_writes_into_output_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.paths.output_dir = tmp.path().to_path_buf();
        cfg.hackmd.enabled = false;

        let sink = TriageOutputSink::new(&cfg);
        let stored = sink.store("My Title", "abc123", "# hi").unwrap();
        assert!(stored.path.starts_with(tmp.path()));
        assert!(stored
            .path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .contains("my-title"));
        assert_eq!(fs::read_to_string(&stored.path).unwrap(), "# hi\n");
    }
}
