//! Error types for JWK Set resolution
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::time::Duration;
use thiserror::Error;

/// Key store errors
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("key not found: {0:?}")]
    NotFound(String),

    #[error("{context}: {source}")]
    Source {
        context: String,
        #[source]
        source: Box<KeyError>,
    },

    #[error("failed to create new JWK Set client: {0}")]
    Construction(String),

    #[error("failed to create new JWK Set client: failed to parse given URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to wait for JWK Set refresh rate limiter: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("JWK validation failed: {0}")]
    Validation(String),

    #[error("the given marshal options are invalid for this key: {0}")]
    InvalidOptions(String),
}

impl KeyError {
    /// Wrap an error with the operation and key ID or source that produced it
    pub fn wrap(context: impl Into<String>, source: KeyError) -> Self {
        KeyError::Source {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error means "no such key", looking through context wrapping
    pub fn is_not_found(&self) -> bool {
        match self {
            KeyError::NotFound(_) => true,
            KeyError::Source { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether this error came from the refresh rate limiter
    pub fn is_rate_limited(&self) -> bool {
        match self {
            KeyError::RateLimit(_) => true,
            KeyError::Source { source, .. } => source.is_rate_limited(),
            _ => false,
        }
    }
}

/// Failures while waiting for refresh permission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("wait cancelled")]
    Cancelled,

    #[error("required wait of {wait:?} would exceed the wait deadline")]
    WouldExceedDeadline { wait: Duration },
}

/// Result type for key store operations
pub type KeyResult<T> = Result<T, KeyError>;

/// Turn a not-found failure into `Ok(None)` so callers can move on to the
/// next source. Every other failure is kept.
pub fn found<T>(result: KeyResult<T>) -> KeyResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_seen_through_wrapping() {
        let err = KeyError::wrap(
            "failed to read key with ID \"a\"",
            KeyError::NotFound("a".to_string()),
        );
        assert!(err.is_not_found());
        assert!(!KeyError::Cancelled.is_not_found());
    }

    #[test]
    fn test_found_tri_state() {
        assert_eq!(found::<u8>(Ok(1)).unwrap(), Some(1));
        assert_eq!(found::<u8>(Err(KeyError::NotFound("x".into()))).unwrap(), None);
        assert!(found::<u8>(Err(KeyError::Validation("bad".into()))).is_err());
    }

    #[test]
    fn test_rate_limit_message_wraps_cause() {
        let err = KeyError::from(RateLimitError::Cancelled);
        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("wait cancelled"));
    }
}
