use std::fmt;

use reqwest::StatusCode;

use crate::token::LogoutReason;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    Http(reqwest::Error),
    /// The key/value backend rejected a read or write.
    Storage(String),
    /// A refresh was requested but no refresh token is stored.
    NoRefreshToken,
    /// The refresh endpoint answered with a non-2xx status.
    RefreshRejected(StatusCode, String),
    /// The refresh endpoint answered 2xx with an unusable body.
    MalformedGrant(String),
    /// The session was ended because the user looked absent.
    Inactive(LogoutReason),
    /// The session this operation belonged to was ended or replaced while it ran.
    Superseded,
    NotAuthenticated,
    Unauthorized(String),
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Json(err) => write!(f, "json error: {err}"),
            Error::Http(err) => write!(f, "http error: {err}"),
            Error::Storage(msg) => write!(f, "storage error: {msg}"),
            Error::NoRefreshToken => write!(f, "no refresh token stored"),
            Error::RefreshRejected(status, msg) => {
                write!(f, "token refresh rejected ({status}): {msg}")
            }
            Error::MalformedGrant(msg) => write!(f, "malformed token response: {msg}"),
            Error::Inactive(reason) => write!(f, "session ended: {reason}"),
            Error::Superseded => write!(f, "session was replaced while the operation ran"),
            Error::NotAuthenticated => write!(f, "not authenticated"),
            Error::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Error::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err)
    }
}
