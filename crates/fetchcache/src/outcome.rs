//! Outcomes of fetch operations and the errors surfaced to callers.
//!
//! A fetch function classifies every response it gets from the remote API into a
//! [`FetchOutcome`]. This classification drives both caching and retries:
//!
//! - [`Success`](FetchOutcome::Success) values are cached.
//! - [`SoftError`](FetchOutcome::SoftError)s are well-formed but empty or negative responses. They
//!   are returned to the caller right away, and are neither retried nor cached.
//! - [`HardError`](FetchOutcome::HardError)s are transport failures. They are retried with backoff,
//!   and surface as [`RequestError::RetriesExhausted`] once all attempts are used up.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// The request a fetch function is asked to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// The endpoint identifier passed to [`get_or_fetch`](crate::RequestCache::get_or_fetch).
    pub endpoint: String,
    /// The request parameters, serialized to JSON.
    pub params: Value,
}

/// A transport-level failure, which is eligible for retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote API did not answer in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The connection to the remote API could not be established or was lost.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The remote API answered with a server error.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    /// Any other failure of the underlying client.
    #[error("transport error: {0}")]
    Other(String),
}

/// A well-formed response that indicates a permanent failure, such as "not found".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SoftError {
    /// The remote API returned no payload at all.
    #[error("empty response")]
    Empty,
    /// The payload carried an explicit error indicator.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// The classified result of a single fetch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Success(T),
    SoftError(SoftError),
    HardError(TransportError),
}

impl<T> FetchOutcome<T> {
    /// Classifies an optional payload, treating a missing payload as [`SoftError::Empty`].
    pub fn from_payload(payload: Option<T>) -> Self {
        match payload {
            Some(value) => Self::Success(value),
            None => Self::SoftError(SoftError::Empty),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl FetchOutcome<Value> {
    /// Classifies a JSON payload.
    ///
    /// `null` is [`SoftError::Empty`], and an object with an `"error"` member is
    /// [`SoftError::Rejected`] carrying that member. Everything else is a success.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::SoftError(SoftError::Empty),
            Value::Object(ref object) if object.contains_key("error") => {
                let message = match &object["error"] {
                    Value::String(message) => message.clone(),
                    other => other.to_string(),
                };
                Self::SoftError(SoftError::Rejected(message))
            }
            value => Self::Success(value),
        }
    }
}

impl<T, E> From<Result<T, E>> for FetchOutcome<T>
where
    E: Into<TransportError>,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::HardError(err.into()),
        }
    }
}

/// An unrecoverable error returned from [`get_or_fetch`](crate::RequestCache::get_or_fetch).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Every attempt failed with a transport error. Carries the last one.
    #[error("fetch failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    /// The request parameters could not be turned into a cache key.
    #[error("invalid request parameters: {0}")]
    InvalidParams(String),
}

/// The non-exceptional result of [`get_or_fetch`](crate::RequestCache::get_or_fetch).
///
/// Callers are expected to branch on soft errors, which are never cached.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Value(T),
    SoftError(SoftError),
}

impl<T> Fetched<T> {
    /// Returns the fetched value, discarding a soft error.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::SoftError(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::SoftError(_) => None,
        }
    }

    pub fn soft_error(&self) -> Option<&SoftError> {
        match self {
            Self::Value(_) => None,
            Self::SoftError(err) => Some(err),
        }
    }
}
