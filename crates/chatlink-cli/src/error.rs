//! Error handling for the chatlink CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Chatlink error: {0}")]
    Chatlink(#[from] chatlink_core::ChatlinkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication did not complete: {0}")]
    Auth(String),

    #[error("QR rendering error: {0}")]
    QrRender(#[from] chatlink_core::QrRenderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML encoding error: {0}")]
    TomlEncoding(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Config(err.to_string())
    }
}

impl From<chatlink_core::SendError> for CliError {
    fn from(err: chatlink_core::SendError) -> Self {
        CliError::Chatlink(err.into())
    }
}

impl From<chatlink_core::AuthError> for CliError {
    fn from(err: chatlink_core::AuthError) -> Self {
        CliError::Chatlink(err.into())
    }
}

impl From<chatlink_core::InitError> for CliError {
    fn from(err: chatlink_core::InitError) -> Self {
        CliError::Chatlink(err.into())
    }
}
