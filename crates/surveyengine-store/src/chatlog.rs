use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use surveyengine_core::domain::{Message, MessageRole};
use surveyengine_core::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLogSummary {
    pub conversation_id: String,
    pub timestamp: String,
    pub created_at: String,
    pub message_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLogDetail {
    pub conversation_id: String,
    pub timestamp: String,
    pub created_at: String,
    pub messages: Vec<Message>,
}

#[derive(Serialize, Deserialize)]
struct ChatLogFile {
    conversation_id: String,
    timestamp: String,
    created_at: String,
    message_count: usize,
    messages: Vec<Message>,
}

/// Appends final transcripts to durable storage on survey completion, one
/// JSON file per conversation, named `chat_{conversation_id}_{timestamp}.json`.
pub struct ChatLogWriter {
    directory: PathBuf,
}

impl ChatLogWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    /// Persist the full transcript. Returns the file path written.
    pub fn save(&self, conversation_id: &str, messages: &[Message]) -> Result<PathBuf> {
        let now = Utc::now();
        let timestamp = now.format("%Y%m%d%H%M%S").to_string();
        let filename = format!("chat_{conversation_id}_{timestamp}.json");
        let path = self.directory.join(filename);

        let log = ChatLogFile {
            conversation_id: conversation_id.to_string(),
            timestamp,
            created_at: now.to_rfc3339(),
            message_count: messages.len(),
            messages: messages.to_vec(),
        };

        let json = serde_json::to_string_pretty(&log)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// List every saved chat log, newest first, for `GET /chat/history`.
    pub fn list(&self) -> Result<Vec<ChatLogSummary>> {
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(log) = self.read_file(&path)? {
                summaries.push(ChatLogSummary {
                    conversation_id: log.conversation_id,
                    timestamp: log.timestamp,
                    created_at: log.created_at,
                    message_count: log.message_count,
                });
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// Full transcript for `GET /chat/history/{conversation_id}`, filtered
    /// to HUMAN/ASSISTANT messages only.
    pub fn read(&self, conversation_id: &str) -> Result<Option<ChatLogDetail>> {
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if !name.ends_with(".json") || !name.contains(conversation_id) {
                continue;
            }
            if let Some(log) = self.read_file(&path)? {
                if log.conversation_id != conversation_id {
                    continue;
                }
                let messages = log
                    .messages
                    .into_iter()
                    .filter(|m| matches!(m.role, MessageRole::Human | MessageRole::Assistant))
                    .collect();
                return Ok(Some(ChatLogDetail {
                    conversation_id: log.conversation_id,
                    timestamp: log.timestamp,
                    created_at: log.created_at,
                    messages,
                }));
            }
        }
        Ok(None)
    }

    fn read_file(&self, path: &Path) -> Result<Option<ChatLogFile>> {
        let contents = fs::read_to_string(path)?;
        match serde_json::from_str(&contents) {
            Ok(log) => Ok(Some(log)),
            Err(e) => {
                tracing::warn!(?path, error = %e, "skipping malformed chat log file");
                Ok(None)
            }
        }
    }
}
