//! YouTube transcript and metadata retrieval.
//!
//! Transcripts come from `yt-dlp` subtitles (manual preferred over
//! auto-generated, English preferred over other languages), converted from
//! WebVTT/SRT to plain text with cue timestamps preserved. Metadata is
//! best-effort: the public oEmbed endpoint for title and channel, enriched
//! by `yt-dlp --dump-json` for duration and upload date when available.
//! Every failure here degrades to "no transcript" / "no metadata"; the
//! pipeline decides what that means for the item.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

/// Returns whether the URL points at YouTube.
#[must_use]
pub fn is_youtube_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    host == "youtu.be" || host == "youtube.com" || host.ends_with(".youtube.com")
}

/// Extracts the video id from watch, share, and shorts URL forms.
#[must_use]
pub fn youtube_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();

    if host == "youtu.be" {
        return parsed
            .path_segments()
            .and_then(|mut segments| segments.find(|segment| !segment.is_empty()))
            .map(str::to_string);
    }

    if host == "youtube.com" || host.ends_with(".youtube.com") {
        if parsed.path().trim_end_matches('/') == "/watch" {
            return parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())
                .filter(|value| !value.is_empty());
        }
        if let Some(rest) = parsed.path().strip_prefix("/shorts/") {
            return rest
                .split('/')
                .find(|segment| !segment.is_empty())
                .map(str::to_string);
        }
    }

    None
}

/// A retrieved transcript.
#[derive(Debug, Clone)]
pub struct YouTubeTranscript {
    /// Plain-text transcript with cue timestamps.
    pub text: String,
    /// Where it came from (currently always `yt-dlp`).
    pub source: &'static str,
    /// Subtitle language tag, when identifiable from the filename.
    pub language: Option<String>,
    /// Whether the subtitles were auto-generated, when identifiable.
    pub is_auto: Option<bool>,
}

/// Best-effort video metadata.
#[derive(Debug, Clone, Default)]
pub struct YouTubeMetadata {
    /// Video title.
    pub title: Option<String>,
    /// Channel name.
    pub channel: Option<String>,
    /// Channel URL.
    pub channel_url: Option<String>,
    /// Upload date, `YYYY-MM-DD`, when known.
    pub upload_date: Option<String>,
    /// Duration in seconds, when known.
    pub duration_seconds: Option<i64>,
    /// Which retrieval paths contributed (`oembed`, `yt-dlp`).
    pub source: String,
    /// Retrieval caveats worth surfacing in the prompt.
    pub notes: Vec<String>,
}

/// Small WebVTT parser: keeps timestamps and text, drops headers, cue
/// numbers, and NOTE blocks.
fn vtt_to_text(vtt: &str) -> String {
    let mut out = Vec::new();
    for line in vtt.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let stripped = line.trim();
        if stripped.is_empty()
            || stripped.to_ascii_uppercase().starts_with("WEBVTT")
            || stripped.starts_with("NOTE")
            || stripped.chars().all(|ch| ch.is_ascii_digit())
        {
            continue;
        }
        if stripped.contains("-->") {
            out.push(format!("[{stripped}]"));
        } else {
            out.push(stripped.to_string());
        }
    }
    out.join("\n").trim().to_string()
}

fn srt_to_text(srt: &str) -> String {
    let mut out = Vec::new();
    for line in srt.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.chars().all(|ch| ch.is_ascii_digit()) {
            continue;
        }
        if stripped.contains("-->") {
            out.push(format!("[{stripped}]"));
        } else {
            out.push(stripped.to_string());
        }
    }
    out.join("\n").trim().to_string()
}

/// Orders subtitle files: manual before auto, English before other
/// languages.
fn pick_sub_file(mut files: Vec<PathBuf>) -> Option<PathBuf> {
    if files.is_empty() {
        return None;
    }
    files.sort_by_key(|path| {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let is_auto = u8::from(name.contains("auto"));
        let not_english = u8::from(!name.contains(".en"));
        (is_auto, not_english, name)
    });
    files.into_iter().next()
}

fn yt_dlp_available() -> bool {
    Command::new("yt-dlp")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

fn subtitle_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("vtt") || ext.eq_ignore_ascii_case("srt"))
        })
        .collect()
}

/// Fetches subtitles via `yt-dlp` and converts them to text.
///
/// Returns `None` when `yt-dlp` is missing, fails, or found no usable
/// subtitles.
#[must_use]
pub fn get_youtube_transcript(url: &str) -> Option<YouTubeTranscript> {
    youtube_video_id(url)?;
    if !yt_dlp_available() {
        debug!("yt-dlp not installed; no transcript retrieval");
        return None;
    }

    let tmp = tempfile::Builder::new().prefix("wmt_yt_").tempdir().ok()?;
    let out_template = tmp.path().join("%(id)s.%(ext)s");

    info!("fetching YouTube subtitles via yt-dlp");
    let output = Command::new("yt-dlp")
        .args([
            "--skip-download",
            "--no-warnings",
            "--write-subs",
            "--write-auto-subs",
            "--sub-format",
            "vtt/srt",
            "--sub-langs",
            "en.*,en",
            "-o",
        ])
        .arg(&out_template)
        .arg(url)
        .output()
        .ok()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(detail = %stderr.trim(), "yt-dlp subtitle fetch failed");
        return None;
    }

    let picked = pick_sub_file(subtitle_files(tmp.path()))?;
    let raw = fs::read_to_string(&picked).ok()?;
    let is_vtt = picked
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("vtt"));
    let text = if is_vtt { vtt_to_text(&raw) } else { srt_to_text(&raw) };
    if text.is_empty() {
        return None;
    }

    let name = picked
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let stem = picked
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("");
    let language = stem
        .split('.')
        .find(|part| part.to_ascii_lowercase().starts_with("en"))
        .map(str::to_string);

    Some(YouTubeTranscript {
        text,
        source: "yt-dlp",
        language,
        is_auto: name.contains("auto").then_some(true),
    })
}

/// yt-dlp reports upload dates as `YYYYMMDD`.
fn parse_upload_date(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.len() != 8 || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    Some(format!(
        "{}-{}-{}",
        &trimmed[0..4],
        &trimmed[4..6],
        &trimmed[6..8]
    ))
}

fn nonempty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn try_oembed(url: &str, timeout: Duration) -> Result<serde_json::Value, String> {
    let endpoint = Url::parse_with_params(
        "https://www.youtube.com/oembed",
        &[("format", "json"), ("url", url)],
    )
    .map_err(|err| err.to_string())?;

    let client = reqwest::blocking::Client::builder()
        .connect_timeout(timeout.min(Duration::from_secs(15)))
        .timeout(timeout)
        .build()
        .map_err(|err| err.to_string())?;
    let response = client
        .get(endpoint.as_str())
        .send()
        .map_err(|err| err.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status().as_u16()));
    }
    response
        .json::<serde_json::Value>()
        .map_err(|err| format!("invalid json: {err}"))
}

// yt-dlp enforces its own network timeouts.
fn try_yt_dlp_json(url: &str) -> Result<serde_json::Value, String> {
    if !yt_dlp_available() {
        return Err("yt-dlp not installed".to_string());
    }
    let output = Command::new("yt-dlp")
        .args(["--dump-json", "--skip-download", "--no-warnings", "--no-playlist"])
        .arg(url)
        .output()
        .map_err(|err| format!("yt-dlp failed to start: {err}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        return Err(if detail.is_empty() {
            format!("yt-dlp exit {}", output.status)
        } else {
            format!("yt-dlp failed: {detail}")
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return Err("yt-dlp returned empty output".to_string());
    }
    serde_json::from_str(first_line).map_err(|err| format!("invalid yt-dlp json: {err}"))
}

/// Best-effort metadata retrieval without API keys.
///
/// Returns `None` for non-YouTube URLs or when nothing could be learned.
#[must_use]
pub fn get_youtube_metadata(url: &str, timeout: Duration) -> Option<YouTubeMetadata> {
    if !is_youtube_url(url) {
        return None;
    }

    let mut meta = YouTubeMetadata::default();
    let mut sources = Vec::new();

    match try_oembed(url, timeout) {
        Ok(data) => {
            sources.push("oembed");
            meta.title = nonempty(data.get("title").and_then(serde_json::Value::as_str));
            meta.channel = nonempty(data.get("author_name").and_then(serde_json::Value::as_str));
            meta.channel_url = nonempty(data.get("author_url").and_then(serde_json::Value::as_str));
        }
        Err(detail) => meta.notes.push(format!("oEmbed unavailable: {detail}")),
    }

    match try_yt_dlp_json(url) {
        Ok(data) => {
            sources.push("yt-dlp");
            meta.title = nonempty(data.get("title").and_then(serde_json::Value::as_str))
                .or(meta.title);
            meta.channel = nonempty(data.get("uploader").and_then(serde_json::Value::as_str))
                .or_else(|| nonempty(data.get("channel").and_then(serde_json::Value::as_str)))
                .or(meta.channel);
            meta.channel_url = nonempty(
                data.get("uploader_url").and_then(serde_json::Value::as_str),
            )
            .or_else(|| nonempty(data.get("channel_url").and_then(serde_json::Value::as_str)))
            .or(meta.channel_url);
            meta.duration_seconds = data
                .get("duration")
                .and_then(serde_json::Value::as_i64)
                .or(meta.duration_seconds);
            meta.upload_date = data
                .get("upload_date")
                .and_then(serde_json::Value::as_str)
                .and_then(parse_upload_date)
                .or(meta.upload_date);
        }
        Err(detail) if detail != "yt-dlp not installed" => meta.notes.push(detail),
        Err(_) => {}
    }

    let learned_nothing = meta.title.is_none()
        && meta.channel.is_none()
        && meta.channel_url.is_none()
        && meta.upload_date.is_none()
        && meta.duration_seconds.is_none();
    if learned_nothing {
        info!(url, "YouTube metadata unavailable");
        return None;
    }

    meta.source = if sources.is_empty() {
        "unknown".to_string()
    } else {
        sources.join("+")
    };
    Some(meta)
}

/// Formats metadata as the prompt's `METADATA` block.
#[must_use]
pub fn format_metadata(meta: Option<&YouTubeMetadata>) -> String {
    let Some(meta) = meta else {
        return String::new();
    };
    let mut lines = vec!["METADATA (script-provided; best-effort):".to_string()];
    if let Some(title) = &meta.title {
        lines.push(format!("- Title: {title}"));
    }
    if let Some(channel) = &meta.channel {
        match &meta.channel_url {
            Some(channel_url) => lines.push(format!("- Channel: {channel} ({channel_url})")),
            None => lines.push(format!("- Channel: {channel}")),
        }
    }
    if let Some(upload_date) = &meta.upload_date {
        lines.push(format!("- Upload date: {upload_date}"));
    }
    if let Some(duration) = meta.duration_seconds {
        lines.push(format!("- Duration seconds: {duration}"));
    }
    lines.push(format!("- Retrieved via: {}", meta.source));
    if !meta.notes.is_empty() {
        lines.push("- Notes:".to_string());
        lines.extend(meta.notes.iter().map(|note| format!("  - {note}")));
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_youtube_hosts() {
        assert!(is_youtube_url("https://www.youtube.com/watch?v=abc"));
        assert!(is_youtube_url("https://youtu.be/abc"));
        assert!(is_youtube_url("https://m.youtube.com/watch?v=abc"));
        assert!(!is_youtube_url("https://example.com/watch?v=abc"));
        assert!(!is_youtube_url("not a url"));
    }

    #[test]
    fn extracts_video_ids() {
        assert_eq!(
            youtube_video_id("https://www.youtube.com/watch?v=abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            youtube_video_id("https://youtu.be/abc123?t=10").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            youtube_video_id("https://www.youtube.com/shorts/xyz/extra").as_deref(),
            Some("xyz")
        );
        assert!(youtube_video_id("https://www.youtube.com/feed/library").is_none());
    }

    #[test]
    fn vtt_conversion_keeps_cues_and_text() {
        let vtt = "WEBVTT\n\n1\n00:00:01.000 --> 00:00:03.000\nhello there\n\nNOTE internal\n\n2\n00:00:03.000 --> 00:00:05.000\nsecond line\n";
        let text = vtt_to_text(vtt);
        assert!(text.contains("[00:00:01.000 --> 00:00:03.000]"));
        assert!(text.contains("hello there"));
        assert!(text.contains("second line"));
        assert!(!text.contains("WEBVTT"));
        assert!(!text.contains("NOTE"));
    }

    #[test]
    fn srt_conversion_drops_cue_numbers() {
        let srt = "1\n00:00:01,000 --> 00:00:03,000\nfirst\n\n2\n00:00:03,000 --> 00:00:05,000\nsecond\n";
        let text = srt_to_text(srt);
        assert!(text.contains("[00:00:01,000 --> 00:00:03,000]"));
        assert!(text.contains("first"));
        assert!(!text.starts_with('1'));
    }

    #[test]
    fn sub_file_preference_manual_english_first() {
        let picked = pick_sub_file(vec![
            PathBuf::from("/tmp/v.en-auto.vtt"),
            PathBuf::from("/tmp/v.de.vtt"),
            PathBuf::from("/tmp/v.en.vtt"),
        ])
        .unwrap();
        assert_eq!(picked, PathBuf::from("/tmp/v.en.vtt"));
    }

    #[test]
    fn upload_date_parsing() {
        assert_eq!(parse_upload_date("20260301").as_deref(), Some("2026-03-01"));
        assert!(parse_upload_date("2026-03-01").is_none());
        assert!(parse_upload_date("").is_none());
    }

    #[test]
    fn metadata_formatting() {
        let meta = YouTubeMetadata {
            title: Some("A Talk".to_string()),
            channel: Some("Chan".to_string()),
            channel_url: Some("https://youtube.com/@chan".to_string()),
            upload_date: Some("2026-03-01".to_string()),
            duration_seconds: Some(600),
            source: "oembed".to_string(),
            notes: vec!["partial".to_string()],
        };
        let block = format_metadata(Some(&meta));
        assert!(block.starts_with("METADATA"));
        assert!(block.contains("- Title: A Talk"));
        assert!(block.contains("- Channel: Chan (https://youtube.com/@chan)"));
        assert!(block.contains("  - partial"));
        assert_eq!(format_metadata(None), "");
    }
}
