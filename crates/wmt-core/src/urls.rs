//! URL normalization and stable link identity.
//!
//! Bookmark identity must survive retitling and tracker-laden share links,
//! so URLs are normalized before hashing: trackers stripped, query pairs
//! sorted, fragments dropped, and YouTube links collapsed to their canonical
//! watch URL so duplicates converge on one identity.

use sha2::{Digest, Sha256};
use url::Url;

/// Query keys dropped during normalization, beyond the `utm_*` prefix.
const DROP_QUERY_KEYS: &[&str] = &[
    // Common analytics / trackers
    "gclid", "fbclid", "igshid", "mc_cid", "mc_eid", "_hsenc", "_hsmi",
    // Misc tracking
    "ref", "ref_src", "spm",
];

/// Returns whether the string looks like an http(s) URL.
#[must_use]
pub fn is_probably_http_url(url: &str) -> bool {
    let lowered = url.trim().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

fn is_youtube_host(host: &str) -> bool {
    host == "youtu.be" || host == "youtube.com" || host.ends_with(".youtube.com")
}

/// Produces a stable canonical URL for YouTube videos:
/// `https://www.youtube.com/watch?v=<VIDEO_ID>`.
///
/// Drops time/playlist/etc so duplicates collapse.
fn canonicalize_youtube(parsed: &Url) -> Option<String> {
    let host = parsed.host_str()?.to_ascii_lowercase();
    if !is_youtube_host(&host) {
        return None;
    }

    let video_id: Option<String> = if host == "youtu.be" {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.find(|segment| !segment.is_empty()))
            .map(str::to_string)
    } else if parsed.path().trim_end_matches('/') == "/watch" {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    } else if let Some(rest) = parsed.path().strip_prefix("/shorts/") {
        rest.split('/')
            .find(|segment| !segment.is_empty())
            .map(str::to_string)
    } else {
        None
    };

    video_id.map(|id| format!("https://www.youtube.com/watch?v={id}"))
}

fn keep_query_key(key: &str) -> bool {
    let lowered = key.trim().to_ascii_lowercase();
    if lowered.is_empty() || lowered.starts_with("utm_") {
        return false;
    }
    !DROP_QUERY_KEYS.contains(&lowered.as_str())
}

/// Normalizes a URL for identity purposes.
///
/// Lowercases scheme and host, drops default ports and fragments, strips
/// tracking query parameters, sorts the surviving query pairs, and trims
/// trailing path slashes. Unparseable input is returned trimmed but
/// otherwise untouched.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let Ok(parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    if let Some(canonical) = canonicalize_youtube(&parsed) {
        return canonical;
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| keep_query_key(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.sort_by(|a, b| {
        a.0.to_ascii_lowercase()
            .cmp(&b.0.to_ascii_lowercase())
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut out = parsed;
    // Fragments are often just scroll position or trackers.
    out.set_fragment(None);
    out.set_query(None);
    if !pairs.is_empty() {
        let mut editor = out.query_pairs_mut();
        for (key, value) in &pairs {
            editor.append_pair(key, value);
        }
        drop(editor);
    }

    let path = out.path().to_string();
    if path != "/" {
        let stripped = path.trim_end_matches('/');
        let stripped = if stripped.is_empty() { "/" } else { stripped };
        if stripped != path {
            out.set_path(stripped);
        }
    }

    out.to_string()
}

/// A normalized URL together with its SHA-256 identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkIdentity {
    /// The normalized form of the input URL.
    pub normalized_url: String,
    /// Hex SHA-256 of the normalized URL.
    pub sha256: String,
}

/// Computes the identity of a bare URL (no bookmark metadata).
#[must_use]
pub fn link_identity(url: &str) -> LinkIdentity {
    let normalized = normalize_url(url);
    let digest = Sha256::digest(normalized.as_bytes());
    LinkIdentity {
        normalized_url: normalized,
        sha256: format!("{digest:x}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_utm_and_fragment() {
        let url = "https://example.com/a/b?utm_source=x&x=1#section";
        assert_eq!(normalize_url(url), "https://example.com/a/b?x=1");
    }

    #[test]
    fn canonicalizes_youtube_watch() {
        let url = "https://www.youtube.com/watch?v=abc123&t=10s&utm_source=x";
        assert_eq!(normalize_url(url), "https://www.youtube.com/watch?v=abc123");
    }

    #[test]
    fn canonicalizes_youtu_be() {
        let url = "https://youtu.be/abc123?t=10";
        assert_eq!(normalize_url(url), "https://www.youtube.com/watch?v=abc123");
    }

    #[test]
    fn canonicalizes_youtube_shorts() {
        let url = "https://www.youtube.com/shorts/xyz789?feature=share";
        assert_eq!(normalize_url(url), "https://www.youtube.com/watch?v=xyz789");
    }

    #[test]
    fn drops_default_port_and_sorts_query() {
        let url = "HTTPS://Example.COM:443/path/?b=2&a=1";
        assert_eq!(normalize_url(url), "https://example.com/path?a=1&b=2");
    }

    #[test]
    fn drops_known_tracker_keys() {
        let url = "https://example.com/x?fbclid=abc&gclid=def&keep=1";
        assert_eq!(normalize_url(url), "https://example.com/x?keep=1");
    }

    #[test]
    fn root_path_is_preserved() {
        assert_eq!(normalize_url("https://example.com"), "https://example.com/");
    }

    #[test]
    fn is_probably_http_url_cases() {
        assert!(is_probably_http_url("https://example.com"));
        assert!(is_probably_http_url("  HTTP://example.com"));
        assert!(!is_probably_http_url("ftp://example.com"));
        assert!(!is_probably_http_url("javascript:alert(1)"));
    }

    #[test]
    fn link_identity_is_stable_across_tracker_noise() {
        let a = link_identity("https://example.com/a?utm_campaign=x&z=1");
        let b = link_identity("https://example.com/a?z=1");
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.normalized_url, "https://example.com/a?z=1");
    }
}
