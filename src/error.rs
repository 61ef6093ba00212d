use std::time::Duration;
use thiserror::Error;

/// Generic fallback shown when the backend rejects a send without saying why.
pub const SEND_FALLBACK: &str = "Erro ao enviar mensagem";

/// Failure of a single remote call, already normalized from whatever shape
/// the backend answered with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("HTTP {status}")]
    Status { status: u16, message: Option<String> },
    #[error("{}", .message.as_deref().unwrap_or("request rejected"))]
    Rejected { message: Option<String> },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("realtime: {0}")]
    Realtime(String),
}

impl ApiError {
    /// Error text reported by the backend itself, if any.
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { message, .. } | ApiError::Rejected { message } => message.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// Everything that can stop an outbound send. None of these is fatal; the
/// compose state is left intact so the user can retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("Aguarde um pouco antes de enviar outra mensagem ({} ms)", .remaining.as_millis())]
    CooldownActive { remaining: Duration },
    #[error("Já existe um envio em andamento")]
    Busy,
    #[error("Conversa sem instância de WhatsApp configurada")]
    MissingInstance,
    #[error("Mídia inválida: {0}")]
    InvalidMedia(String),
    #[error("Falha ao criar URL de upload: {0}")]
    UploadUrlFailed(String),
    #[error("Falha no upload (HTTP {status})")]
    UploadFailed { status: u16 },
    #[error("{0}")]
    SendRejected(String),
    #[error("Erro de rede: {0}")]
    Network(String),
}

impl SendError {
    pub(crate) fn from_upload_url(e: ApiError) -> Self {
        SendError::UploadUrlFailed(e.backend_message().map(str::to_string).unwrap_or_else(|| e.to_string()))
    }

    pub(crate) fn from_upload(e: ApiError) -> Self {
        match e {
            ApiError::Status { status, .. } => SendError::UploadFailed { status },
            other => SendError::Network(other.to_string()),
        }
    }

    pub(crate) fn from_send(e: ApiError) -> Self {
        match e {
            ApiError::Rejected { message } | ApiError::Status { message, .. } => {
                SendError::SendRejected(message.unwrap_or_else(|| SEND_FALLBACK.to_string()))
            }
            other => SendError::Network(other.to_string()),
        }
    }

    /// Guard rejections are informational; everything else is an error.
    pub fn is_informational(&self) -> bool {
        matches!(self, SendError::CooldownActive { .. } | SendError::Busy)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory available")]
    NoConfigDir,
    #[error("missing setting: {0}")]
    Missing(&'static str),
    #[error("invalid base url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http client: {0}")]
    HttpClient(String),
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config write: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no data directory available")]
    NoDataDir,
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cache row: {0}")]
    Json(#[from] serde_json::Error),
}
