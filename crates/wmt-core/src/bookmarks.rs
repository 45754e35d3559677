//! Item store: read-only candidate listing from a Brave/Chromium
//! `Bookmarks` JSON file.
//!
//! The browser owns the file and may rewrite it at any moment, so every
//! listing re-reads it from scratch and any read or parse failure is
//! reported as the source being unavailable for this invocation - the
//! caller does not retry.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

/// Seconds between 1601-01-01 (Chromium epoch) and 1970-01-01 (Unix epoch).
const CHROMIUM_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// Errors raised when the bookmark source cannot be listed.
///
/// All variants mean the same thing to the pipeline: the source is
/// unavailable for this invocation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// The bookmarks file does not exist.
    #[error("bookmarks file not found: {}", path.display())]
    NotFound {
        /// Path that was probed.
        path: PathBuf,
    },

    /// The bookmarks file could not be read.
    #[error("failed to read bookmarks file {}: {source}", path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The bookmarks file is not valid JSON (the browser may be mid-write).
    #[error("bookmarks file is not valid JSON (maybe mid-write?): {}: {detail}", path.display())]
    InvalidJson {
        /// Path that was parsed.
        path: PathBuf,
        /// Parse error detail.
        detail: String,
    },

    /// The bookmarks JSON is missing the configured root.
    #[error("bookmarks JSON missing roots.{root}: {}", path.display())]
    MissingRoot {
        /// The configured root name.
        root: String,
        /// Path that was parsed.
        path: PathBuf,
    },
}

/// Converts a Chromium `date_added` value (microseconds since 1601-01-01
/// UTC) to a timestamp. Returns `None` for missing, non-numeric, or
/// out-of-range values.
#[must_use]
pub fn chromium_date_added_to_datetime(value: &str) -> Option<DateTime<Utc>> {
    let micros: i64 = value.trim().parse().ok()?;
    if micros <= 0 {
        return None;
    }
    let unix_micros = micros.checked_sub(CHROMIUM_EPOCH_OFFSET_SECS.checked_mul(1_000_000)?)?;
    Utc.timestamp_micros(unix_micros).single()
}

/// One candidate bookmark. Immutable; owned by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkItem {
    /// The bookmark URL as stored by the browser.
    pub url: String,
    /// Display title, if any.
    pub title: Option<String>,
    /// Browser-assigned GUID; stable for the life of the bookmark.
    pub guid: Option<String>,
    /// Browser-assigned node id.
    pub node_id: Option<String>,
    /// Raw `date_added` string from the bookmarks file.
    pub date_added_raw: Option<String>,
    /// Parsed `date_added`, when the raw value was usable.
    pub date_added: Option<DateTime<Utc>>,
}

impl BookmarkItem {
    /// A manually supplied item with no bookmark metadata. Its identity
    /// reduces to the normalized URL, so direct processing is idempotent
    /// per URL.
    #[must_use]
    pub fn manual(url: impl Into<String>, title: Option<String>) -> Self {
        Self {
            url: url.into(),
            title,
            guid: None,
            node_id: None,
            date_added_raw: None,
            date_added: None,
        }
    }

    /// Stable identity string for idempotency.
    ///
    /// Bookmark titles can be edited, but `guid` and `date_added` are
    /// intended to remain stable for an item. The normalized URL is
    /// included so obvious duplicates collapse.
    #[must_use]
    pub fn identity_string(&self, normalized_url: &str) -> String {
        format!(
            "url={normalized_url}\ndate_added={}\nguid={}\nid={}",
            self.date_added_raw.as_deref().unwrap_or(""),
            self.guid.as_deref().unwrap_or(""),
            self.node_id.as_deref().unwrap_or(""),
        )
    }

    /// Hex SHA-256 of [`Self::identity_string`]; the ledger key.
    #[must_use]
    pub fn identity_sha256(&self, normalized_url: &str) -> String {
        let digest = Sha256::digest(self.identity_string(normalized_url).as_bytes());
        format!("{digest:x}")
    }
}

#[derive(Debug, Deserialize)]
struct BookmarksFile {
    #[serde(default)]
    roots: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct BookmarkNode {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    guid: Option<String>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    date_added: Option<serde_json::Value>,
    #[serde(default)]
    children: Vec<BookmarkNode>,
}

impl BookmarkNode {
    fn is_folder(&self) -> bool {
        self.kind.as_deref() == Some("folder")
    }
}

fn value_to_trimmed_string(value: Option<&serde_json::Value>) -> Option<String> {
    let rendered = match value? {
        serde_json::Value::String(text) => text.trim().to_string(),
        serde_json::Value::Number(number) => number.to_string(),
        _ => return None,
    };
    if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    }
}

/// Finds the first folder named `name` in a depth-first walk of `node`.
fn find_folder<'a>(node: &'a BookmarkNode, name: &str) -> Option<&'a BookmarkNode> {
    if !node.is_folder() {
        return None;
    }
    if node.name.as_deref().map(str::trim) == Some(name) {
        return Some(node);
    }
    node.children
        .iter()
        .find_map(|child| find_folder(child, name))
}

fn collect_url_items(node: &BookmarkNode, items: &mut Vec<BookmarkItem>) {
    if node.kind.as_deref() == Some("url") {
        let url = node.url.as_deref().unwrap_or("").trim();
        if !url.is_empty() {
            let date_added_raw = value_to_trimmed_string(node.date_added.as_ref());
            items.push(BookmarkItem {
                url: url.to_string(),
                title: node
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|title| !title.is_empty())
                    .map(str::to_string),
                guid: node
                    .guid
                    .as_deref()
                    .map(str::trim)
                    .filter(|guid| !guid.is_empty())
                    .map(str::to_string),
                node_id: value_to_trimmed_string(node.id.as_ref()),
                date_added: date_added_raw
                    .as_deref()
                    .and_then(chromium_date_added_to_datetime),
                date_added_raw,
            });
        }
        return;
    }
    if node.is_folder() {
        for child in &node.children {
            collect_url_items(child, items);
        }
    }
}

/// Loads the bookmarks file and returns url items under
/// `roots.<root_name>/.../<folder_name>`, in file order.
///
/// A missing inbox folder is not an error: the user may simply not have
/// created it yet, so an empty list is returned.
///
/// # Errors
///
/// Returns [`SourceError`] when the file cannot be read or parsed, or the
/// configured root is absent.
pub fn load_inbox_bookmarks(
    path: &Path,
    root_name: &str,
    folder_name: &str,
) -> Result<Vec<BookmarkItem>, SourceError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(SourceError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(err) => {
            return Err(SourceError::Read {
                path: path.to_path_buf(),
                source: err,
            });
        }
    };

    let file: BookmarksFile =
        serde_json::from_str(&content).map_err(|err| SourceError::InvalidJson {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;

    let root_value = file
        .roots
        .get(root_name)
        .ok_or_else(|| SourceError::MissingRoot {
            root: root_name.to_string(),
            path: path.to_path_buf(),
        })?;
    let root: BookmarkNode =
        serde_json::from_value(root_value.clone()).map_err(|err| SourceError::InvalidJson {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;

    let Some(folder) = find_folder(&root, folder_name) else {
        info!(root = root_name, folder = folder_name, "inbox folder not found");
        return Ok(Vec::new());
    };

    let mut items = Vec::new();
    for child in &folder.children {
        collect_url_items(child, &mut items);
    }
    Ok(items)
}

/// A lazy, re-evaluated provider of candidate items.
///
/// Implementations must re-read the backing source on every call; the
/// underlying list may change between invocations.
pub trait ItemSource {
    /// Lists current candidates, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the backing list cannot be read.
    fn list_candidates(&self) -> Result<Vec<BookmarkItem>, SourceError>;
}

/// [`ItemSource`] backed by a Brave/Chromium bookmarks file.
#[derive(Debug, Clone)]
pub struct BraveBookmarkSource {
    /// Path to the browser's `Bookmarks` JSON file.
    pub path: PathBuf,
    /// Root key under `roots` (usually `bookmark_bar`).
    pub root_name: String,
    /// Name of the inbox folder to scan.
    pub inbox_folder: String,
}

impl ItemSource for BraveBookmarkSource {
    fn list_candidates(&self) -> Result<Vec<BookmarkItem>, SourceError> {
        let mut items = load_inbox_bookmarks(&self.path, &self.root_name, &self.inbox_folder)?;
        // Oldest first so the backlog drains in the order it accumulated.
        items.sort_by(|a, b| {
            let ka = a.date_added.map_or(0, |added| added.timestamp());
            let kb = b.date_added.map_or(0, |added| added.timestamp());
            ka.cmp(&kb).then_with(|| a.url.cmp(&b.url))
        });
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_bookmarks(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("Bookmarks");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_inbox_urls_under_bookmark_bar() {
        let tmp = tempfile::tempdir().unwrap();
        let body = serde_json::json!({
            "roots": {
                "bookmark_bar": {
                    "type": "folder",
                    "children": [{
                        "type": "folder",
                        "name": "Inbox",
                        "children": [{
                            "type": "url",
                            "name": "Example",
                            "url": "https://example.com",
                            "guid": "abc",
                            "id": "123",
                            "date_added": "13412614145662919",
                        }],
                    }],
                }
            }
        });
        let path = write_bookmarks(tmp.path(), &body.to_string());

        let items = load_inbox_bookmarks(&path, "bookmark_bar", "Inbox").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://example.com");
        assert_eq!(items[0].title.as_deref(), Some("Example"));
        assert!(items[0].date_added.is_some());
    }

    #[test]
    fn nested_subfolders_are_walked() {
        let tmp = tempfile::tempdir().unwrap();
        let body = serde_json::json!({
            "roots": {
                "bookmark_bar": {
                    "type": "folder",
                    "children": [{
                        "type": "folder",
                        "name": "Inbox",
                        "children": [{
                            "type": "folder",
                            "name": "Later",
                            "children": [{
                                "type": "url",
                                "url": "https://nested.example.com",
                            }],
                        }],
                    }],
                }
            }
        });
        let path = write_bookmarks(tmp.path(), &body.to_string());

        let items = load_inbox_bookmarks(&path, "bookmark_bar", "Inbox").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://nested.example.com");
    }

    #[test]
    fn missing_inbox_folder_is_empty_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let body = serde_json::json!({
            "roots": { "bookmark_bar": { "type": "folder", "children": [] } }
        });
        let path = write_bookmarks(tmp.path(), &body.to_string());

        let items = load_inbox_bookmarks(&path, "bookmark_bar", "Inbox").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn missing_file_is_source_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_inbox_bookmarks(&tmp.path().join("nope"), "bookmark_bar", "Inbox")
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }

    #[test]
    fn invalid_json_is_source_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_bookmarks(tmp.path(), "{not json");
        let err = load_inbox_bookmarks(&path, "bookmark_bar", "Inbox").unwrap_err();
        assert!(matches!(err, SourceError::InvalidJson { .. }));
    }

    #[test]
    fn candidates_sort_oldest_first() {
        let tmp = tempfile::tempdir().unwrap();
        // 13412614145662919 is later than 13412614000000000.
        let body = serde_json::json!({
            "roots": {
                "bookmark_bar": {
                    "type": "folder",
                    "children": [{
                        "type": "folder",
                        "name": "Inbox",
                        "children": [
                            {"type": "url", "url": "https://b.example.com", "date_added": "13412614145662919"},
                            {"type": "url", "url": "https://a.example.com", "date_added": "13412614000000000"},
                        ],
                    }],
                }
            }
        });
        let path = write_bookmarks(tmp.path(), &body.to_string());
        let source = BraveBookmarkSource {
            path,
            root_name: "bookmark_bar".to_string(),
            inbox_folder: "Inbox".to_string(),
        };

        let items = source.list_candidates().unwrap();
        assert_eq!(items[0].url, "https://a.example.com");
        assert_eq!(items[1].url, "https://b.example.com");
    }

    #[test]
    fn chromium_timestamp_conversion() {
        // 2001-01-01T00:00:00Z in Chromium microseconds.
        let micros = (CHROMIUM_EPOCH_OFFSET_SECS + 978_307_200) * 1_000_000;
        let parsed = chromium_date_added_to_datetime(&micros.to_string()).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2001-01-01T00:00:00+00:00");

        assert!(chromium_date_added_to_datetime("0").is_none());
        assert!(chromium_date_added_to_datetime("not-a-number").is_none());
    }

    #[test]
    fn manual_item_identity_reduces_to_url() {
        let a = BookmarkItem::manual("https://example.com/a", None);
        let b = BookmarkItem::manual("https://example.com/a", Some("Title".to_string()));
        assert_eq!(
            a.identity_sha256("https://example.com/a"),
            b.identity_sha256("https://example.com/a"),
        );
    }
}
