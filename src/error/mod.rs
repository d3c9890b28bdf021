use crate::quota::QuotaRejection;
use crate::websocket::ConnectionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Application does not exist")]
    ApplicationNotFound,

    #[error("Application disabled")]
    ApplicationDisabled,

    #[error("The current concurrent connections quota has been reached.")]
    OverConnectionQuota,

    #[error("{0}")]
    Quota(#[from] QuotaRejection),

    // Channel specific errors
    #[error("Channel error: {0}")]
    Channel(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // Connection errors
    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    // Protocol errors
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Own request ignored")]
    OwnRequestIgnored,

    #[error("Horizontal adapter error: {0}")]
    HorizontalAdapter(String),

    #[error("Config file error: {0}")]
    ConfigFile(String),
}

impl Error {
    pub fn close_code(&self) -> u16 {
        match self {
            Error::ApplicationNotFound => 4001,
            Error::ApplicationDisabled => 4003,
            Error::OverConnectionQuota => 4004,
            Error::Auth(_) => 4009,
            Error::Channel(_) => 4300,
            Error::Quota(rejection) => rejection.status(),
            _ => 4000,
        }
    }

    /// State a Pusher client ends up in after being closed with this error.
    pub fn client_state(&self) -> ConnectionState {
        ConnectionState::after_close(self.close_code())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            return Err($err);
        }
    };
}
