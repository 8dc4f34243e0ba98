//! `ClaudeCli` — scans a per-project directory of line-delimited JSON
//! conversation files, emitting one [`InboxEntry`] per tool invocation that
//! fetches a URL. See `spec.md` §4.7, §6 "Tool-history input contracts".
//!
//! Line schema (unspecified by the source beyond "structural match on a
//! web-fetch tool call"; fixed here): each line is a JSON object with a
//! `role` of `"user"` or `"assistant"`. A user line carries `text`. An
//! assistant line may carry `tool_calls: [{"name": "web_fetch", "input":
//! {"url": "..."}}]`. The nearest preceding user line's `text` becomes
//! `user_query`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;

use crate::entry::{ImportSource, InboxEntry};
use crate::error::Result;

use super::{build_inbox_entry, Connector};

pub struct ClaudeCli {
    /// Root directory containing one subdirectory (or file) per project.
    pub root: PathBuf,
}

impl ClaudeCli {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn project_name(&self, source: &Path) -> Option<String> {
        source
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}

impl Connector for ClaudeCli {
    fn name(&self) -> &'static str {
        "claude-cli"
    }

    fn available(&self) -> bool {
        self.root.is_dir()
    }

    fn list_history_sources(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort();
        files
    }

    fn extract(&self, source: &Path, since_marker: Option<&str>) -> Result<Vec<InboxEntry>> {
        let skip: usize = since_marker.and_then(|m| m.parse().ok()).unwrap_or(0);
        let raw = fs::read_to_string(source)?;
        let project = self.project_name(source);
        let conversation_id = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned());

        let mut out = Vec::new();
        let mut last_user_text: Option<String> = None;
        for (idx, line) in raw.lines().enumerate() {
            if idx < skip || line.trim().is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            let role = value.get("role").and_then(Value::as_str).unwrap_or("");
            if role == "user" {
                last_user_text = value.get("text").and_then(Value::as_str).map(str::to_string);
                continue;
            }
            if role != "assistant" {
                continue;
            }
            let Some(tool_calls) = value.get("tool_calls").and_then(Value::as_array) else {
                continue;
            };
            for call in tool_calls {
                let is_fetch = call
                    .get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|n| n.eq_ignore_ascii_case("web_fetch"));
                if !is_fetch {
                    continue;
                }
                let Some(url) = call
                    .get("input")
                    .and_then(|i| i.get("url"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                let assistant_snippet = value.get("text").and_then(Value::as_str).map(str::to_string);
                out.push(build_inbox_entry(
                    url,
                    self.name(),
                    project.clone(),
                    conversation_id.clone(),
                    last_user_text.clone(),
                    assistant_snippet,
                    Utc::now(),
                    ImportSource::Realtime,
                ));
            }
        }
        Ok(out)
    }

    fn provide_marker(&self, source: &Path) -> Option<String> {
        let raw = fs::read_to_string(source).ok()?;
        Some(raw.lines().count().to_string())
    }
}
