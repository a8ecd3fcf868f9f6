//! Runs synchronous host calls off the async executor.

use crate::error::{StoreError, StoreResult};

/// Runs `f` on the blocking thread pool and awaits its single result.
///
/// A panicking or cancelled task surfaces as a transient error.
pub(crate) async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| StoreError::transient(format!("host task failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn passes_results_through() {
        assert_eq!(blocking(|| Ok(41 + 1)).await, Ok(42));
        let err = blocking::<(), _>(|| Err(StoreError::schema("nope")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }

    #[tokio::test]
    async fn panics_become_transient() {
        let err = blocking::<(), _>(|| panic!("host blew up")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientStoreError);
    }
}
