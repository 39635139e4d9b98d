//! Error types shared by the dispatcher and the linkers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Not found endpoint")]
    NotFoundEndpoint,

    #[error("Not found route: {0}")]
    NotFoundRoute(i32),

    #[error("Not found event: {0}")]
    NotFoundEvent(i32),

    #[error("Not found user location")]
    NotFoundUserLocation,

    /// The target instance no longer holds the session, even after one re-resolution.
    #[error("Not found session")]
    NotFoundSession,

    #[error("Invalid gate id")]
    InvalidGid,

    #[error("Invalid node id")]
    InvalidNid,

    #[error("Receive target is empty")]
    ReceiveTargetEmpty,

    #[error("Invalid session kind")]
    InvalidSessionKind,

    #[error("Illegal request")]
    IllegalRequest,

    #[error("Invalid kind: {0}")]
    InvalidKind(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid balance strategy: {0}")]
    InvalidStrategy(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Watch setup timed out")]
    WatchTimeout,

    /// Failure reported by a transport, registry or locator collaborator.
    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
