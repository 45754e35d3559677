//! Remote publishers.
//!
//! Publishers are best-effort collaborators with a uniform result shape;
//! the sink decides what a failed publish means for the item. Only HackMD
//! is implemented today.

use crate::config::AppConfig;

/// Outcome of one publisher invocation.
#[derive(Debug, Clone)]
pub struct PublishResult {
    /// Publisher name.
    pub publisher: &'static str,
    /// Whether the publish succeeded.
    pub ok: bool,
    /// URL of the published note, when the publisher returned one.
    pub url: Option<String>,
    /// Publisher-side note id, when returned.
    pub note_id: Option<String>,
    /// Failure detail when `ok` is false.
    pub error: Option<String>,
}

/// Runs every enabled publisher against the document.
#[must_use]
pub fn publish_all(cfg: &AppConfig, markdown: &str) -> Vec<PublishResult> {
    let mut results = Vec::new();
    if cfg.hackmd.enabled {
        results.push(hackmd::publish_markdown(&cfg.hackmd, markdown));
    }
    results
}

/// HackMD note publisher.
pub mod hackmd {
    use std::time::Duration;

    use serde_json::json;
    use thiserror::Error;
    use tracing::info;

    use super::PublishResult;
    use crate::config::HackMdConfig;

    /// HackMD API errors.
    #[derive(Debug, Error)]
    #[non_exhaustive]
    pub enum HackMdError {
        /// Required configuration is missing.
        #[error("hackmd {field} is empty")]
        MissingConfig {
            /// The missing field.
            field: &'static str,
        },

        /// The HTTP request failed before or during transport.
        #[error("{detail}")]
        Transport {
            /// Failure detail.
            detail: String,
        },

        /// The API answered with a non-success status.
        #[error("HTTP {status}: {detail}")]
        Api {
            /// HTTP status code.
            status: u16,
            /// Response body or reason.
            detail: String,
        },

        /// The API response was not the expected JSON object.
        #[error("hackmd response was not a JSON object")]
        UnexpectedPayload,
    }

    /// A created note.
    #[derive(Debug, Clone)]
    pub struct HackMdNote {
        /// Note id assigned by HackMD.
        pub note_id: Option<String>,
        /// Public link to the note, when present in the response.
        pub url: Option<String>,
    }

    // HackMD APIs have varied historically; try the common fields.
    fn extract_note_url(data: &serde_json::Value) -> Option<String> {
        for key in ["publishLink", "permalink", "link", "url"] {
            if let Some(value) = data.get(key).and_then(serde_json::Value::as_str) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        None
    }

    /// Creates a note in the configured parent folder.
    ///
    /// # Errors
    ///
    /// Returns [`HackMdError`] when configuration is incomplete or the API
    /// call fails.
    pub fn create_note(cfg: &HackMdConfig, content: &str) -> Result<HackMdNote, HackMdError> {
        if cfg.api_token.trim().is_empty() {
            return Err(HackMdError::MissingConfig { field: "api_token" });
        }
        if cfg.parent_folder_id.trim().is_empty() {
            return Err(HackMdError::MissingConfig {
                field: "parent_folder_id",
            });
        }

        let endpoint = format!("{}/notes", cfg.api_base_url.trim_end_matches('/'));
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(cfg.timeout_seconds.min(15)))
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .map_err(|err| HackMdError::Transport {
                detail: err.to_string(),
            })?;

        let response = client
            .post(&endpoint)
            .bearer_auth(cfg.api_token.trim())
            .json(&json!({
                "parentFolderId": cfg.parent_folder_id,
                "content": content,
            }))
            .send()
            .map_err(|err| HackMdError::Transport {
                detail: err.to_string(),
            })?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            return Err(HackMdError::Api {
                status: status.as_u16(),
                detail: body.trim().to_string(),
            });
        }

        let data: serde_json::Value = if body.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&body).map_err(|_| HackMdError::UnexpectedPayload)?
        };
        if !data.is_object() {
            return Err(HackMdError::UnexpectedPayload);
        }

        Ok(HackMdNote {
            note_id: data
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            url: extract_note_url(&data),
        })
    }

    /// Publishes markdown as a new note.
    ///
    /// HackMD uses the first H1 in the content as the note title.
    #[must_use]
    pub fn publish_markdown(cfg: &HackMdConfig, markdown: &str) -> PublishResult {
        match create_note(cfg, markdown) {
            Ok(note) => {
                match &note.url {
                    Some(url) => info!(%url, "hackmd note created"),
                    None => info!("hackmd note created (no URL in response)"),
                }
                PublishResult {
                    publisher: "hackmd",
                    ok: true,
                    url: note.url,
                    note_id: note.note_id,
                    error: None,
                }
            }
            Err(err) => PublishResult {
                publisher: "hackmd",
                ok: false,
                url: None,
                note_id: None,
                error: Some(err.to_string()),
            },
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn missing_token_fails_without_network() {
            let cfg = HackMdConfig {
                enabled: true,
                api_token: String::new(),
                parent_folder_id: "folder".to_string(),
                ..HackMdConfig::default()
            };
            let result = publish_markdown(&cfg, "# hi");
            assert!(!result.ok);
            assert!(result.error.unwrap().contains("api_token"));
        }

        #[test]
        fn missing_folder_fails_without_network() {
            let cfg = HackMdConfig {
                enabled: true,
                api_token: "token".to_string(),
                parent_folder_id: String::new(),
                ..HackMdConfig::default()
            };
            let err = create_note(&cfg, "# hi").unwrap_err();
            assert!(matches!(
                err,
                HackMdError::MissingConfig {
                    field: "parent_folder_id"
                }
            ));
        }

        #[test]
        fn note_url_extraction_prefers_publish_link() {
            let data = serde_json::json!({
                "publishLink": "https://hackmd.io/@u/abc",
                "url": "https://other",
            });
            assert_eq!(
                extract_note_url(&data).as_deref(),
                Some("https://hackmd.io/@u/abc")
            );
            assert!(extract_note_url(&serde_json::json!({})).is_none());
        }
    }
}
