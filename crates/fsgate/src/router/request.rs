//! Request and response shapes exchanged with the API layer.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::provider::FileMetadata;

/// Operation named by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Read,
    Write,
    Delete,
    List,
    Create,
    Move,
    Copy,
    Stat,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Delete => "delete",
            Operation::List => "list",
            Operation::Create => "create",
            Operation::Move => "move",
            Operation::Copy => "copy",
            Operation::Stat => "stat",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How `content` is encoded in requests and responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    #[default]
    Utf8,
    Base64,
}

/// A file operation as received from the API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub operation: Operation,
    pub provider_id: String,
    pub file_path: String,
    /// Target of move and copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_path: Option<String>,
    /// Data for writes. Absent content writes an empty file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub content_encoding: ContentEncoding,
    /// Recurse into subdirectories when listing
    #[serde(default)]
    pub recursive: bool,
    /// Authenticated caller
    pub user_id: String,
}

impl OperationRequest {
    pub fn new(
        operation: Operation,
        provider_id: impl Into<String>,
        file_path: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            provider_id: provider_id.into(),
            file_path: file_path.into(),
            destination_path: None,
            content: None,
            content_encoding: ContentEncoding::Utf8,
            recursive: false,
            user_id: user_id.into(),
        }
    }

    /// Attach text content.
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self.content_encoding = ContentEncoding::Utf8;
        self
    }

    /// Attach binary content, base64 encoded.
    pub fn binary_content(mut self, content: &[u8]) -> Self {
        self.content = Some(STANDARD.encode(content));
        self.content_encoding = ContentEncoding::Base64;
        self
    }

    pub fn destination(mut self, path: impl Into<String>) -> Self {
        self.destination_path = Some(path.into());
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Decoded write payload.
    pub fn content_bytes(&self) -> Result<Vec<u8>> {
        let Some(content) = &self.content else {
            return Ok(Vec::new());
        };
        match self.content_encoding {
            ContentEncoding::Utf8 => Ok(content.as_bytes().to_vec()),
            ContentEncoding::Base64 => STANDARD
                .decode(content)
                .map_err(|e| Error::Configuration(format!("content is not valid base64: {}", e))),
        }
    }
}

/// Normalized result of [`execute`](super::ProviderRouter::execute).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// File content for reads. Text when valid UTF-8, otherwise base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<ContentEncoding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadata>,
    pub timestamp: DateTime<Utc>,
}

impl OperationResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            content: None,
            content_encoding: None,
            files: None,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    /// Failure response carrying only the user-safe message.
    pub fn failure(err: &Error) -> Self {
        Self {
            success: false,
            message: Some(err.user_message()),
            ..Self::ok("")
        }
    }

    pub(crate) fn with_content(mut self, bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => {
                self.content = Some(text);
                self.content_encoding = Some(ContentEncoding::Utf8);
            }
            Err(e) => {
                self.content = Some(STANDARD.encode(e.as_bytes()));
                self.content_encoding = Some(ContentEncoding::Base64);
            }
        }
        self
    }

    pub(crate) fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = Some(files);
        self
    }

    pub(crate) fn with_metadata(mut self, metadata: FileMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Decoded `content`, if any.
    pub fn content_bytes(&self) -> Result<Option<Vec<u8>>> {
        let Some(content) = &self.content else {
            return Ok(None);
        };
        match self.content_encoding.unwrap_or_default() {
            ContentEncoding::Utf8 => Ok(Some(content.as_bytes().to_vec())),
            ContentEncoding::Base64 => STANDARD
                .decode(content)
                .map(Some)
                .map_err(|e| Error::Internal(format!("malformed base64 content: {}", e))),
        }
    }
}
