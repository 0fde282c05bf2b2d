use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure class, stable enough to use as a metric tag value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    InvalidRequest,
    Connect,
    Timeout,
    Body,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url `{0}`")]
    InvalidUrl(String),

    #[error("unsupported url scheme in `{0}` (expected http or https)")]
    UnsupportedScheme(String),

    #[error("invalid header `{0}`")]
    InvalidHeader(String),

    #[error("cannot build request: {0}")]
    Build(#[from] http::Error),

    #[error("request failed: {0}")]
    Send(#[from] hyper_util::client::legacy::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("cannot read response body: {0}")]
    Body(#[from] hyper::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_) | Self::UnsupportedScheme(_) => ErrorKind::InvalidUrl,
            Self::InvalidHeader(_) | Self::Build(_) => ErrorKind::InvalidRequest,
            Self::Send(_) => ErrorKind::Connect,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Body(_) => ErrorKind::Body,
            Self::Json(_) => ErrorKind::Json,
        }
    }
}
