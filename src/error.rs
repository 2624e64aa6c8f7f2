//! Error types for recorder configuration and request verification.

use std::fmt;

use crate::model::RequestState;

/// Recorder construction failed.
#[derive(Debug)]
pub enum ConfigError {
    /// An internal-URL filter pattern did not compile.
    InvalidGlob {
        pattern: String,
        source: globset::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGlob { pattern, source } => {
                write!(f, "invalid internal URL pattern '{pattern}': {source}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidGlob { source, .. } => Some(source),
        }
    }
}

/// A request lookup or assertion against the reconstructed graph failed.
#[derive(Debug)]
pub enum VerifyError {
    /// No page exists yet, so there is nothing to verify against.
    NoPage,
    /// No request on the current page matched the pattern.
    NoMatch { pattern: String },
    /// The pattern itself did not compile.
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },
    /// The matched request failed at the transport level.
    RequestError { url: String, error: String },
    /// The matched request completed with a non-success HTTP status.
    HttpStatus {
        url: String,
        code: u16,
        text: Option<String>,
    },
    /// The matched request never reached the completed state.
    NotCompleted { url: String, state: RequestState },
    /// The matched WebSocket never finished its handshake.
    WebSocketNotReady { url: String, state: RequestState },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPage => write!(f, "no page recorded yet"),
            Self::NoMatch { pattern } => {
                write!(f, "no request matching '{pattern}' on the current page")
            }
            Self::InvalidPattern { pattern, source } => {
                write!(f, "invalid request pattern '{pattern}': {source}")
            }
            Self::RequestError { url, error } => {
                write!(f, "request {url} failed: {error}")
            }
            Self::HttpStatus { url, code, text } => match text {
                Some(text) => write!(f, "request {url} returned {code} {text}"),
                None => write!(f, "request {url} returned {code}"),
            },
            Self::NotCompleted { url, state } => {
                write!(f, "request {url} not complete (state: {state})")
            }
            Self::WebSocketNotReady { url, state } => {
                write!(f, "websocket {url} handshake not complete (state: {state})")
            }
        }
    }
}

impl std::error::Error for VerifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidPattern { source, .. } => Some(source),
            _ => None,
        }
    }
}
