//! The uniform result envelope returned by every storage operation.

use crate::error::{ErrorKind, StoreError, StoreResult};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::time::Duration;

/// Outcome of one storage operation plus the time it took.
///
/// A result is either a success carrying `data` or a failure carrying an
/// error, never both. The duration covers the whole call, retries and
/// retry waits included.
///
/// Serializes as:
///
/// ```text
/// { "success": true,  "data": ...,  "durationMs": 1.25 }
/// { "success": false, "error": { "kind": "KeyConflict", "message": "..." }, "durationMs": 0.4 }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult<T> {
    outcome: StoreResult<T>,
    duration: Duration,
}

impl<T> OperationResult<T> {
    /// Creates a successful result.
    pub fn ok(data: T, duration: Duration) -> Self {
        Self {
            outcome: Ok(data),
            duration,
        }
    }

    /// Creates a failed result.
    pub fn err(error: StoreError, duration: Duration) -> Self {
        Self {
            outcome: Err(error),
            duration,
        }
    }

    /// Wraps an operation outcome.
    pub fn from_result(outcome: StoreResult<T>, duration: Duration) -> Self {
        Self { outcome, duration }
    }

    /// Returns true if the operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns the data of a successful operation.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    /// Returns the error of a failed operation.
    #[must_use]
    pub fn error(&self) -> Option<&StoreError> {
        self.outcome.as_ref().err()
    }

    /// Returns the error classification of a failed operation.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(StoreError::kind)
    }

    /// Elapsed wall-clock time.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Elapsed wall-clock time in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_nanos() as f64 / 1_000_000.0
    }

    /// Consumes the result, returning the data of a successful operation.
    pub fn into_data(self) -> Option<T> {
        self.outcome.ok()
    }

    /// Consumes the result, returning the outcome.
    pub fn into_result(self) -> StoreResult<T> {
        self.outcome
    }

    /// Maps the data of a successful result.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        OperationResult {
            outcome: self.outcome.map(f),
            duration: self.duration,
        }
    }
}

impl<T: Serialize> Serialize for OperationResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("OperationResult", 3)?;
        state.serialize_field("success", &self.is_success())?;
        match &self.outcome {
            Ok(data) => state.serialize_field("data", data)?,
            Err(error) => state.serialize_field("error", error)?,
        }
        state.serialize_field("durationMs", &self.duration_ms())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_and_error_are_exclusive() {
        let ok = OperationResult::ok(5, Duration::from_millis(2));
        assert!(ok.is_success());
        assert_eq!(ok.data(), Some(&5));
        assert!(ok.error().is_none());

        let err: OperationResult<i32> =
            OperationResult::err(StoreError::transient("busy"), Duration::ZERO);
        assert!(!err.is_success());
        assert!(err.data().is_none());
        assert_eq!(err.error_kind(), Some(ErrorKind::TransientStoreError));
    }

    #[test]
    fn duration_is_reported_in_milliseconds() {
        let result = OperationResult::ok((), Duration::from_micros(1500));
        assert!((result.duration_ms() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn map_keeps_duration() {
        let result = OperationResult::ok(2, Duration::from_millis(7)).map(|n| n * 10);
        assert_eq!(result.data(), Some(&20));
        assert_eq!(result.duration(), Duration::from_millis(7));
    }

    #[test]
    fn serialized_shape() {
        let ok = OperationResult::ok(Some(json!({"v": 1})), Duration::from_millis(3));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"success": true, "data": {"v": 1}, "durationMs": 3.0})
        );

        let missing: OperationResult<Option<i32>> = OperationResult::ok(None, Duration::ZERO);
        let value = serde_json::to_value(&missing).unwrap();
        assert_eq!(value["data"], json!(null));

        let err: OperationResult<()> =
            OperationResult::err(StoreError::not_registered("T"), Duration::ZERO);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error"]["kind"], json!("NotRegistered"));
        assert!(value.get("data").is_none());
    }
}
