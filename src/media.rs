use crate::api::models::MediaKind;
use crate::error::SendError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::Path;

/// Media ready for upload: raw bytes plus the MIME type they go out with.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub kind: MediaKind,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPayload")
            .field("kind", &self.kind)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl MediaPayload {
    pub fn from_bytes(kind: MediaKind, mime_type: &str, bytes: Vec<u8>) -> Result<Self, SendError> {
        let mime_type = base_mime(mime_type);
        if !mime_type.starts_with(kind.mime_prefix()) {
            return Err(SendError::InvalidMedia(format!("{mime_type} is not {}*", kind.mime_prefix())));
        }
        if bytes.is_empty() {
            return Err(SendError::InvalidMedia("empty file".into()));
        }
        Ok(Self { kind, mime_type, bytes })
    }

    /// Decodes a `data:<mime>[;params];base64,<payload>` URL, which is what
    /// the audio recorder hands over.
    pub fn from_data_url(kind: MediaKind, data_url: &str) -> Result<Self, SendError> {
        let rest = data_url
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| SendError::InvalidMedia("not a data URL".into()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| SendError::InvalidMedia("data URL without payload".into()))?;
        if !header.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
            return Err(SendError::InvalidMedia("data URL is not base64".into()));
        }
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| SendError::InvalidMedia(e.to_string()))?;
        Self::from_bytes(kind, header, bytes)
    }

    /// Reads a local file; the MIME type is guessed from the extension
    /// unless one is given.
    pub async fn from_file(kind: MediaKind, path: &Path, mime_type: Option<&str>) -> Result<Self, SendError> {
        let mime_type = match mime_type {
            Some(m) => m.to_string(),
            None => mime_guess::from_path(path)
                .first()
                .map(|m| m.essence_str().to_string())
                .ok_or_else(|| SendError::InvalidMedia(format!("unknown type for {}", path.display())))?,
        };
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SendError::InvalidMedia(format!("{}: {e}", path.display())))?;
        Self::from_bytes(kind, &mime_type, bytes)
    }
}

/// `audio/webm;codecs=opus` -> `audio/webm`
fn base_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}
