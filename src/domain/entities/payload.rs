//! Message payload variants.
//!
//! A payload is exactly one of text, file reference, location or contact.
//! Structural presence is enforced by deserialization; content rules
//! (non-blank text, coordinate ranges, ...) by [`Payload::validate`].

use serde::{Deserialize, Serialize};

/// Content of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    #[serde(alias = "TEXT")]
    Text { text: String },

    #[serde(alias = "FILE")]
    File { file: FileRef },

    #[serde(alias = "LOCATION")]
    Location { location: Location },

    #[serde(alias = "CONTACT")]
    Contact { contact: Contact },
}

/// Kind of media behind a file reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    #[default]
    Document,
}

/// Reference to a previously uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    #[serde(default)]
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Payload content rule violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Text message must have text content")]
    EmptyText,

    #[error("File message must have a file reference")]
    MissingFileReference,

    #[error("Location message must have latitude and longitude within range")]
    InvalidCoordinates,

    #[error("Contact message must have contact name")]
    MissingContactName,
}

impl Payload {
    /// Check the type-specific required fields.
    pub fn validate(&self) -> Result<(), PayloadError> {
        match self {
            Payload::Text { text } if text.trim().is_empty() => Err(PayloadError::EmptyText),
            Payload::File { file } if file.file_id.trim().is_empty() => {
                Err(PayloadError::MissingFileReference)
            }
            Payload::Location { location }
                if !(location.latitude.is_finite()
                    && location.longitude.is_finite()
                    && (-90.0..=90.0).contains(&location.latitude)
                    && (-180.0..=180.0).contains(&location.longitude)) =>
            {
                Err(PayloadError::InvalidCoordinates)
            }
            Payload::Contact { contact } if contact.name.trim().is_empty() => {
                Err(PayloadError::MissingContactName)
            }
            _ => Ok(()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Text { .. } => "text",
            Payload::File { .. } => "file",
            Payload::Location { .. } => "location",
            Payload::Contact { .. } => "contact",
        }
    }

    /// Text rendition handed to channel adapters for non-file payloads.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Payload::Text { text } => Some(text.clone()),
            Payload::Location { location } => Some(match &location.name {
                Some(name) => format!("{} ({}, {})", name, location.latitude, location.longitude),
                None => format!("{}, {}", location.latitude, location.longitude),
            }),
            Payload::Contact { contact } => Some(match &contact.phone {
                Some(phone) => format!("{} {}", contact.name, phone),
                None => contact.name.clone(),
            }),
            Payload::File { .. } => None,
        }
    }

    pub fn file(&self) -> Option<&FileRef> {
        match self {
            Payload::File { file } => Some(file),
            _ => None,
        }
    }
}
