//! Enrichment: the external reasoning CLI (codex) and its payload
//! assembly.
//!
//! The runner takes the configured command template and injects the flags
//! the pipeline depends on - web search, output capture, model and
//! reasoning-effort overrides - each only when the user has not already
//! supplied it. The prompt goes in on stdin; the analysis comes back
//! through `--output-last-message` so interleaved progress output on
//! stdout cannot corrupt it.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{CodexConfig, FetchConfig};
use crate::pipeline::{EnrichRequest, EnrichedDocument, Enricher};
use crate::prompt;
use crate::youtube;

/// How often the runner polls a child that has not exited yet.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Enrichment errors. Each becomes the `note` on a `failed` ledger entry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnrichError {
    /// Enrichment is disabled in config.
    #[error("codex is disabled in config")]
    Disabled,

    /// The configured command template is empty.
    #[error("codex.command is empty")]
    EmptyCommand,

    /// The codex binary could not be found.
    #[error("codex command not found: {command}")]
    NotFound {
        /// The binary that was invoked.
        command: String,
    },

    /// The subprocess outlived its timeout and produced no output.
    #[error("codex timed out after {timeout_secs}s (increase codex.timeout_seconds in config)")]
    Timeout {
        /// The configured timeout.
        timeout_secs: u64,
    },

    /// The subprocess exited unsuccessfully.
    #[error("codex failed: {detail}")]
    Failed {
        /// stderr/stdout excerpt or exit status.
        detail: String,
    },

    /// The subprocess exited cleanly but wrote no last message.
    #[error("codex produced no output (empty last message)")]
    EmptyOutput,

    /// A YouTube item had no retrievable transcript.
    #[error("no YouTube transcript available")]
    NoTranscript,

    /// Plumbing around the subprocess failed (temp files, pipes).
    #[error("codex invocation error: {detail}")]
    Io {
        /// Failure detail.
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Command template injection
// ---------------------------------------------------------------------------

fn stdin_marker_index(cmd: &[String]) -> Option<usize> {
    cmd.iter().position(|part| part == "-")
}

/// Ensures `--output-last-message <path>` is present, inserting it before
/// the `-` stdin-prompt argument (appending `-` first if missing).
fn ensure_output_last_message(mut cmd: Vec<String>, output_path: &Path) -> Vec<String> {
    if cmd
        .iter()
        .any(|part| part == "-o" || part == "--output-last-message")
    {
        return cmd;
    }
    let idx = stdin_marker_index(&cmd).unwrap_or_else(|| {
        cmd.push("-".to_string());
        cmd.len() - 1
    });
    cmd.splice(
        idx..idx,
        [
            "--output-last-message".to_string(),
            output_path.display().to_string(),
        ],
    );
    cmd
}

fn inject_model(mut cmd: Vec<String>, model: &str) -> Vec<String> {
    let model = model.trim();
    if model.is_empty() || cmd.iter().any(|part| part == "-m" || part == "--model") {
        return cmd;
    }
    let idx = stdin_marker_index(&cmd).unwrap_or(cmd.len());
    cmd.splice(idx..idx, ["--model".to_string(), model.to_string()]);
    cmd
}

fn inject_reasoning_effort(mut cmd: Vec<String>, reasoning_effort: &str) -> Vec<String> {
    let reasoning_effort = reasoning_effort.trim();
    if reasoning_effort.is_empty() {
        return cmd;
    }
    // A user-supplied config override wins.
    if cmd.iter().any(|part| part.contains("model_reasoning_effort")) {
        return cmd;
    }
    let idx = stdin_marker_index(&cmd).unwrap_or(cmd.len());
    // The codex CLI parses the value as TOML, so the string must be quoted.
    cmd.splice(
        idx..idx,
        [
            "-c".to_string(),
            format!("model_reasoning_effort=\"{reasoning_effort}\""),
        ],
    );
    cmd
}

/// `--search` is a global flag and must appear before the `exec`
/// subcommand.
fn inject_web_search(mut cmd: Vec<String>, enabled: bool) -> Vec<String> {
    if !enabled || cmd.iter().any(|part| part == "--search") {
        return cmd;
    }
    if let Some(idx) = cmd
        .iter()
        .position(|part| part == "exec" || part == "e")
    {
        cmd.insert(idx, "--search".to_string());
        return cmd;
    }
    if !cmd.is_empty() {
        cmd.insert(1, "--search".to_string());
    }
    cmd
}

// ---------------------------------------------------------------------------
// Subprocess runner
// ---------------------------------------------------------------------------

fn spawn_reader(stream: Option<impl Read + Send + 'static>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_string(&mut buffer);
        }
        buffer
    })
}

fn read_captured_output(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Runs the codex CLI with the prompt on stdin and returns the captured
/// last message.
///
/// # Errors
///
/// Returns [`EnrichError`] when the process cannot run, times out without
/// output, fails, or produces nothing.
pub fn run_codex(cfg: &CodexConfig, stdin_prompt: &str) -> Result<String, EnrichError> {
    if !cfg.enabled {
        return Err(EnrichError::Disabled);
    }
    if cfg.command.is_empty() {
        return Err(EnrichError::EmptyCommand);
    }

    let tmp = tempfile::Builder::new()
        .prefix("wmt_codex_")
        .tempdir()
        .map_err(|err| EnrichError::Io {
            detail: format!("failed to create temp dir: {err}"),
        })?;
    let out_path = tmp.path().join("codex_last_message.txt");

    let cmd = inject_web_search(cfg.command.clone(), cfg.web_search_enabled);
    let cmd = ensure_output_last_message(cmd, &out_path);
    let cmd = inject_model(cmd, &cfg.model);
    let cmd = inject_reasoning_effort(cmd, &cfg.model_reasoning_effort);

    info!(command = %cmd.join(" "), "running codex");
    let mut child = Command::new(&cmd[0])
        .args(&cmd[1..])
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                EnrichError::NotFound {
                    command: cmd[0].clone(),
                }
            } else {
                EnrichError::Io {
                    detail: format!("failed to spawn codex: {err}"),
                }
            }
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // Feed stdin from a thread: a prompt larger than the pipe buffer
        // must not block the timeout loop. A closed pipe just means the
        // child exited early; its status tells the real story.
        let prompt = stdin_prompt.to_string();
        thread::spawn(move || {
            let _ = stdin.write_all(prompt.as_bytes());
        });
    }
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let deadline = Instant::now() + Duration::from_secs(cfg.timeout_seconds);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    // A timed-out run that still wrote an output file is
                    // salvageable partial output.
                    if let Some(partial) = read_captured_output(&out_path) {
                        warn!(
                            timeout_secs = cfg.timeout_seconds,
                            "codex timed out but produced an output file; using partial output"
                        );
                        return Ok(partial);
                    }
                    return Err(EnrichError::Timeout {
                        timeout_secs: cfg.timeout_seconds,
                    });
                }
                thread::sleep(CHILD_POLL_INTERVAL);
            }
            Err(err) => {
                return Err(EnrichError::Io {
                    detail: format!("failed to wait for codex: {err}"),
                });
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        let detail = {
            let stderr = stderr.trim();
            let stdout = stdout.trim();
            if !stderr.is_empty() {
                stderr.to_string()
            } else if !stdout.is_empty() {
                stdout.to_string()
            } else {
                status.to_string()
            }
        };
        return Err(EnrichError::Failed { detail });
    }

    read_captured_output(&out_path).ok_or(EnrichError::EmptyOutput)
}

// ---------------------------------------------------------------------------
// Payload assembly
// ---------------------------------------------------------------------------

/// Truncates to a character budget, appending a marker when trimmed. A
/// zero budget disables the cap.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((idx, _)) => format!("{}\n\n[TRUNCATED]\n", text[..idx].trim_end()),
    }
}

/// Production enricher: YouTube payload gathering, prompt assembly, codex
/// invocation.
pub struct CodexEnricher {
    /// Codex CLI settings.
    pub codex: CodexConfig,
    /// Fetch budgets.
    pub fetch: FetchConfig,
    /// Optional prompt template override.
    pub prompt_template: Option<std::path::PathBuf>,
}

struct Payload {
    transcript: String,
    metadata: String,
    extracted_title: Option<String>,
}

impl CodexEnricher {
    fn build_payload(&self, request: &EnrichRequest<'_>) -> Result<Payload, EnrichError> {
        let timeout = Duration::from_secs(self.fetch.timeout_seconds);

        if let Some(user_transcript) = request
            .transcript
            .map(str::trim)
            .filter(|text| !text.is_empty())
        {
            let meta = youtube::is_youtube_url(request.url)
                .then(|| youtube::get_youtube_metadata(request.url, timeout))
                .flatten();
            let payload = format!("TRANSCRIPT PROVIDED BY USER:\n\n{user_transcript}");
            return Ok(Payload {
                transcript: truncate_chars(&payload, self.fetch.max_transcript_chars),
                metadata: youtube::format_metadata(meta.as_ref()),
                extracted_title: meta.and_then(|meta| meta.title),
            });
        }

        if youtube::is_youtube_url(request.url) {
            let meta = youtube::get_youtube_metadata(request.url, timeout);
            let extracted_title = meta.as_ref().and_then(|meta| meta.title.clone());
            let metadata = youtube::format_metadata(meta.as_ref());

            let Some(transcript) = youtube::get_youtube_transcript(request.url)
                .filter(|transcript| !transcript.text.trim().is_empty())
            else {
                // A video the reasoning service cannot watch and we cannot
                // transcribe is not analyzable.
                return Err(EnrichError::NoTranscript);
            };
            info!(
                source = transcript.source,
                chars = transcript.text.len(),
                "retrieved YouTube transcript"
            );

            let mut header = vec![
                "TRANSCRIPT SOURCE: YouTube captions".to_string(),
                format!("- Retrieved via: {}", transcript.source),
            ];
            if let Some(language) = &transcript.language {
                header.push(format!("- Language: {language}"));
            }
            if let Some(is_auto) = transcript.is_auto {
                header.push(format!("- Auto-generated: {is_auto}"));
            }
            let payload = format!("{}\n\n{}", header.join("\n"), transcript.text.trim());
            return Ok(Payload {
                transcript: truncate_chars(&payload, self.fetch.max_transcript_chars),
                metadata,
                extracted_title,
            });
        }

        // Normal webpages: leave the transcript empty and rely on the
        // reasoning service's own browsing.
        Ok(Payload {
            transcript: String::new(),
            metadata: String::new(),
            extracted_title: None,
        })
    }
}

impl Enricher for CodexEnricher {
    fn enrich(&self, request: &EnrichRequest<'_>) -> Result<EnrichedDocument, EnrichError> {
        let payload = self.build_payload(request)?;

        let stdin_prompt = prompt::build_triage_prompt(
            request.url,
            &payload.transcript,
            &payload.metadata,
            self.prompt_template.as_deref(),
        )
        .map_err(|err| EnrichError::Io {
            detail: err.to_string(),
        })?;

        let markdown = run_codex(&self.codex, &stdin_prompt)?;
        Ok(EnrichedDocument {
            markdown: markdown.trim().to_string(),
            title: payload
                .extracted_title
                .or_else(|| request.title_hint.map(str::to_string)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cmd() -> Vec<String> {
        ["codex", "exec", "--skip-git-repo-check", "-"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn output_capture_is_injected_before_stdin_marker() {
        let cmd = ensure_output_last_message(base_cmd(), Path::new("/tmp/out.txt"));
        let idx = cmd.iter().position(|p| p == "--output-last-message").unwrap();
        assert_eq!(cmd[idx + 1], "/tmp/out.txt");
        assert_eq!(cmd.last().unwrap(), "-");
        assert!(idx < cmd.iter().position(|p| p == "-").unwrap());
    }

    #[test]
    fn output_capture_respects_existing_flag() {
        let cmd = vec![
            "codex".to_string(),
            "exec".to_string(),
            "-o".to_string(),
            "/elsewhere".to_string(),
            "-".to_string(),
        ];
        let injected = ensure_output_last_message(cmd.clone(), Path::new("/tmp/out.txt"));
        assert_eq!(injected, cmd);
    }

    #[test]
    fn output_capture_appends_stdin_marker_when_missing() {
        let cmd = ensure_output_last_message(
            vec!["codex".to_string(), "exec".to_string()],
            Path::new("/tmp/out.txt"),
        );
        assert_eq!(cmd.last().unwrap(), "-");
        assert!(cmd.iter().any(|p| p == "--output-last-message"));
    }

    #[test]
    fn model_injection() {
        let cmd = inject_model(base_cmd(), "gpt-5.3-codex");
        let idx = cmd.iter().position(|p| p == "--model").unwrap();
        assert_eq!(cmd[idx + 1], "gpt-5.3-codex");
        assert!(idx < cmd.iter().position(|p| p == "-").unwrap());

        assert_eq!(inject_model(base_cmd(), ""), base_cmd());
        let with_model = vec![
            "codex".to_string(),
            "-m".to_string(),
            "other".to_string(),
            "-".to_string(),
        ];
        assert_eq!(inject_model(with_model.clone(), "x"), with_model);
    }

    #[test]
    fn reasoning_effort_is_quoted_toml() {
        let cmd = inject_reasoning_effort(base_cmd(), "high");
        let idx = cmd.iter().position(|p| p == "-c").unwrap();
        assert_eq!(cmd[idx + 1], "model_reasoning_effort=\"high\"");

        // An existing override wins.
        let with_override = vec![
            "codex".to_string(),
            "-c".to_string(),
            "model_reasoning_effort=\"low\"".to_string(),
            "-".to_string(),
        ];
        assert_eq!(
            inject_reasoning_effort(with_override.clone(), "high"),
            with_override
        );
    }

    #[test]
    fn web_search_goes_before_exec_subcommand() {
        let cmd = inject_web_search(base_cmd(), true);
        let search_idx = cmd.iter().position(|p| p == "--search").unwrap();
        let exec_idx = cmd.iter().position(|p| p == "exec").unwrap();
        assert!(search_idx < exec_idx);

        assert_eq!(inject_web_search(base_cmd(), false), base_cmd());
        let already = inject_web_search(cmd.clone(), true);
        assert_eq!(already.iter().filter(|p| *p == "--search").count(), 1);
    }

    #[test]
    fn disabled_codex_is_an_error() {
        let cfg = CodexConfig {
            enabled: false,
            ..CodexConfig::default()
        };
        assert!(matches!(run_codex(&cfg, "prompt"), Err(EnrichError::Disabled)));
    }

    #[test]
    fn empty_command_is_an_error() {
        let cfg = CodexConfig {
            command: Vec::new(),
            ..CodexConfig::default()
        };
        assert!(matches!(
            run_codex(&cfg, "prompt"),
            Err(EnrichError::EmptyCommand)
        ));
    }

    #[test]
    fn missing_binary_is_not_found() {
        let cfg = CodexConfig {
            command: vec!["wmt-definitely-not-a-binary".to_string(), "-".to_string()],
            timeout_seconds: 5,
            ..CodexConfig::default()
        };
        assert!(matches!(
            run_codex(&cfg, "prompt"),
            Err(EnrichError::NotFound { .. })
        ));
    }

    #[test]
    fn failing_command_reports_detail() {
        // `false` exits non-zero with no output.
        let cfg = CodexConfig {
            command: vec!["false".to_string()],
            timeout_seconds: 5,
            web_search_enabled: false,
            ..CodexConfig::default()
        };
        let err = run_codex(&cfg, "prompt").unwrap_err();
        assert!(matches!(err, EnrichError::Failed { .. }));
    }

    #[test]
    fn successful_command_with_no_output_file_is_empty_output() {
        // `true` exits 0 without writing the capture file.
        let cfg = CodexConfig {
            command: vec!["true".to_string()],
            timeout_seconds: 5,
            web_search_enabled: false,
            ..CodexConfig::default()
        };
        let err = run_codex(&cfg, "prompt").unwrap_err();
        assert!(matches!(err, EnrichError::EmptyOutput));
    }

    #[test]
    fn captured_output_is_returned() {
        // The injected capture path lands in $2; write the document there.
        let cfg = CodexConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "printf '# doc\\n' > \"$2\"".to_string(),
                "wmt-test".to_string(),
            ],
            timeout_seconds: 5,
            web_search_enabled: false,
            ..CodexConfig::default()
        };
        // Command becomes: sh -c <script> wmt-test --output-last-message
        // <path> - so $1 is the flag and $2 the path.
        let markdown = run_codex(&cfg, "prompt").unwrap();
        assert_eq!(markdown, "# doc");
    }

    #[test]
    fn timeout_without_output_is_reported() {
        let cfg = CodexConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "sleep 30".to_string(),
            ],
            timeout_seconds: 1,
            web_search_enabled: false,
            ..CodexConfig::default()
        };
        let err = run_codex(&cfg, "prompt").unwrap_err();
        assert!(matches!(err, EnrichError::Timeout { timeout_secs: 1 }));
    }

    #[test]
    fn truncation_appends_marker() {
        let text = "abcdef";
        assert_eq!(truncate_chars(text, 0), "abcdef");
        assert_eq!(truncate_chars(text, 10), "abcdef");
        let truncated = truncate_chars(text, 3);
        assert!(truncated.starts_with("abc"));
        assert!(truncated.contains("[TRUNCATED]"));
    }
}
