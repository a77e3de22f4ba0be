//! Call error handling
//!
//! The display strings of [`CallError`] are matched by external tooling and
//! must stay exactly as written.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Why a synchronous call did not produce a value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// No reply arrived within the deadline
    #[error("timed out after {millis} ms.")]
    Timeout { millis: u128 },

    /// The client reported an error
    #[error("remote error: {0}")]
    Remote(String),

    /// The connection is gone or went away while waiting
    #[error("connection closed")]
    ConnectionClosed,
}

impl CallError {
    /// Timeout error for a given duration
    pub fn timeout(after: Duration) -> Self {
        CallError::Timeout {
            millis: after.as_millis(),
        }
    }
}

/// Tagged result of a synchronous call
///
/// Callers branch on this instead of treating failures as hard errors.
/// [`CallOutcome::into_result`] converts to a `Result` for callers that abort
/// on any failure.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// Client replied `ok`
    Ok(Value),
    /// Client replied `error` with this text
    Error(String),
    /// Deadline elapsed
    TimedOut(Duration),
    /// Connection closed before a reply
    ConnectionClosed,
}

impl CallOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, CallOutcome::Ok(_))
    }

    /// Convert into a `Result`, failing on every non-ok outcome
    pub fn into_result(self) -> Result<Value, CallError> {
        match self {
            CallOutcome::Ok(value) => Ok(value),
            CallOutcome::Error(message) => Err(CallError::Remote(message)),
            CallOutcome::TimedOut(after) => Err(CallError::timeout(after)),
            CallOutcome::ConnectionClosed => Err(CallError::ConnectionClosed),
        }
    }
}

/// Render an error-status reply payload as text
pub(crate) fn remote_error_text(result: &Value) -> String {
    match result {
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(text)) => text.clone(),
            _ => result.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timeout_message_is_verbatim() {
        let err = CallError::timeout(Duration::from_millis(5000));
        assert_eq!(err.to_string(), "timed out after 5000 ms.");
    }

    #[test]
    fn test_remote_message_includes_text() {
        let err = CallOutcome::Error("undefinedFn is not defined".to_string())
            .into_result()
            .unwrap_err();
        assert!(err.to_string().contains("undefinedFn is not defined"));
    }

    #[test]
    fn test_outcome_conversion() {
        assert_eq!(CallOutcome::Ok(json!(4)).into_result(), Ok(json!(4)));
        assert_eq!(
            CallOutcome::ConnectionClosed.into_result(),
            Err(CallError::ConnectionClosed)
        );
        assert_eq!(
            CallOutcome::TimedOut(Duration::from_millis(20)).into_result(),
            Err(CallError::Timeout { millis: 20 })
        );
    }

    #[test]
    fn test_remote_error_text() {
        assert_eq!(remote_error_text(&json!("boom")), "boom");
        assert_eq!(remote_error_text(&json!({"message": "bad"})), "bad");
        assert_eq!(remote_error_text(&json!(12)), "12");
    }
}
