use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys stamped on every journal line. Payload fields with these names are
/// dropped.
pub const RESERVED_KEYS: [&str; 3] = ["type", "session_id", "ts"];

/// What a journal line records. One per public pipeline operation that
/// changed or produced something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEvent {
    GenerationFinished,
    CaptionBatchFinished,
    TrainingSubmitted,
    TrainingPolled,
    ProjectCreated,
    ImagesUploaded,
}

impl PipelineEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerationFinished => "generation_finished",
            Self::CaptionBatchFinished => "caption_batch_finished",
            Self::TrainingSubmitted => "training_submitted",
            Self::TrainingPolled => "training_polled",
            Self::ProjectCreated => "project_created",
            Self::ImagesUploaded => "images_uploaded",
        }
    }
}

/// Append-only JSONL journal of pipeline events, shared by every request of a
/// process. Each line is `{type, session_id, ts, ..payload}`.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<Journal>,
}

#[derive(Debug)]
struct Journal {
    path: PathBuf,
    session_id: String,
    append: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Journal {
                path: path.into(),
                session_id: session_id.into(),
                append: Mutex::new(()),
            }),
        }
    }

    /// Journal tagged with a fresh session id, one per CLI invocation or server.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(path, format!("session-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Appends one line. `payload` is expected to be an object; any other
    /// value is recorded under `data`.
    pub fn emit(&self, event: PipelineEvent, payload: Value) -> Result<Value> {
        let line = self.stamp(event, payload);
        let encoded = serde_json::to_string(&line)?;

        if let Some(parent) = self.inner.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let _guard = self
            .inner
            .append
            .lock()
            .map_err(|_| anyhow!("event journal lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .with_context(|| format!("failed to open {}", self.inner.path.display()))?;
        file.write_all(format!("{encoded}\n").as_bytes())?;

        Ok(line)
    }

    fn stamp(&self, event: PipelineEvent, payload: Value) -> Value {
        let mut line = Map::new();
        line.insert("type".to_string(), Value::String(event.as_str().to_string()));
        line.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        line.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        match payload {
            Value::Object(fields) => {
                for (key, value) in fields {
                    if !RESERVED_KEYS.contains(&key.as_str()) {
                        line.insert(key, value);
                    }
                }
            }
            Value::Null => {}
            other => {
                line.insert("data".to_string(), other);
            }
        }
        Value::Object(line)
    }
}
