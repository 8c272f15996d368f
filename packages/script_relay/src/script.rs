//! Script file loading for dispatch requests.
//!
//! Turns the raw body of `POST /execute_file` into a validated, fully-read
//! script. Checks run in a fixed order and stop at the first failure:
//! path present, path exists, path is a file, extension allowed, contents
//! readable as UTF-8.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::ExecuteError;
use crate::ws::ServerMessage;

/// Which file extensions may be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPolicy {
    /// Dotted extensions, e.g. `.lua`
    pub allowed: Vec<String>,
    pub case_insensitive: bool,
}

impl ExtensionPolicy {
    /// Returns the dotted extension of `path` if it is allowed.
    pub fn check(&self, path: &Path) -> Result<String, ExecuteError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let allowed = self.allowed.iter().any(|a| {
            if self.case_insensitive {
                a.eq_ignore_ascii_case(&extension)
            } else {
                *a == extension
            }
        });

        if allowed && !extension.is_empty() {
            Ok(extension)
        } else {
            Err(ExecuteError::InvalidExtension {
                allowed: self.allowed.clone(),
                got: extension,
            })
        }
    }
}

/// A validated script ready to broadcast
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub path: PathBuf,
    pub file_name: String,
    pub extension: String,
    pub contents: String,
    pub generated_at: DateTime<Utc>,
}

impl ScriptRequest {
    /// Validate the request body and read the referenced file.
    pub async fn load(body: &str, policy: &ExtensionPolicy) -> Result<Self, ExecuteError> {
        let raw_path = body.trim();
        if raw_path.is_empty() {
            return Err(ExecuteError::MissingPath);
        }

        let path = PathBuf::from(raw_path);
        // try_exists errors (e.g. permission denied on a parent) count as missing
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ExecuteError::NotFound(raw_path.to_string()));
        }

        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .map_err(|e| ExecuteError::Read(e.to_string()))?;
        if !is_file {
            return Err(ExecuteError::NotAFile(raw_path.to_string()));
        }

        let extension = policy.check(&path)?;

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ExecuteError::Read(e.to_string()))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            path,
            file_name,
            extension,
            contents,
            generated_at: Utc::now(),
        })
    }

    /// The envelope agents receive. Contents go out verbatim.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Execute {
            script: self.contents.clone(),
            filename: self.file_name.clone(),
            timestamp: self.generated_at.to_rfc3339(),
        }
    }
}
