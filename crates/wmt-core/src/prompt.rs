//! Triage prompt assembly.
//!
//! The template ships with the crate; a config override path can replace
//! it. Only the *input value slots* are filled, and only their first
//! occurrence - later references like "If {TRANSCRIPT} is present..." stay
//! intact as variable names rather than duplicating transcript text.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

const PACKAGED_TEMPLATE: &str = include_str!("../prompts/triage_prompt.md");

/// Prompt template errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PromptError {
    /// The configured template override does not exist.
    #[error("triage prompt file not found: {}", path.display())]
    TemplateNotFound {
        /// Path that was probed.
        path: PathBuf,
    },

    /// The template override could not be read.
    #[error("failed to read triage prompt {}: {detail}", path.display())]
    TemplateRead {
        /// Path that was read.
        path: PathBuf,
        /// Failure detail.
        detail: String,
    },
}

fn load_template(override_path: Option<&Path>) -> Result<String, PromptError> {
    match override_path {
        None => Ok(PACKAGED_TEMPLATE.trim().to_string()),
        Some(path) => {
            if !path.exists() {
                return Err(PromptError::TemplateNotFound {
                    path: path.to_path_buf(),
                });
            }
            fs::read_to_string(path)
                .map(|content| content.trim().to_string())
                .map_err(|err| PromptError::TemplateRead {
                    path: path.to_path_buf(),
                    detail: err.to_string(),
                })
        }
    }
}

/// Builds the triage prompt for one item.
///
/// # Errors
///
/// Returns [`PromptError`] when a configured template override cannot be
/// loaded.
pub fn build_triage_prompt(
    link: &str,
    transcript: &str,
    metadata: &str,
    template_override: Option<&Path>,
) -> Result<String, PromptError> {
    let prompt = load_template(template_override)?;
    let prompt = prompt.replacen("{LINK}", link, 1);
    let prompt = prompt.replacen("{TRANSCRIPT}", transcript, 1);
    let prompt = prompt.replacen("{METADATA}", metadata, 1);
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_only_first_occurrence_of_each_slot() {
        let prompt =
            build_triage_prompt("https://example.com", "the transcript", "meta", None).unwrap();
        assert!(prompt.contains("https://example.com"));
        assert!(prompt.contains("the transcript"));
        // The instructional reference further down stays a variable name.
        assert!(prompt.contains("If {TRANSCRIPT} is present"));
        assert_eq!(prompt.matches("the transcript").count(), 1);
    }

    #[test]
    fn override_template_is_used() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prompt.md");
        fs::write(&path, "Custom: {LINK} / {TRANSCRIPT} / {METADATA}").unwrap();

        let prompt = build_triage_prompt("u", "t", "m", Some(&path)).unwrap();
        assert_eq!(prompt, "Custom: u / t / m");
    }

    #[test]
    fn missing_override_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err =
            build_triage_prompt("u", "t", "m", Some(&tmp.path().join("absent.md"))).unwrap_err();
        assert!(matches!(err, PromptError::TemplateNotFound { .. }));
    }
}
