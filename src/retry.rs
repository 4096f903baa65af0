//! Helpers for writing single attempts that [`keen_retry`] can retry.
//!
//! An attempt returns a [`RetryResult`]. Errors that may go away on their own
//! become [`RetryResult::Transient`], and everything else becomes
//! [`RetryResult::Fatal`], which stops the retry loop immediately.

use keen_retry::RetryResult;

/// `?` for attempts: on error, return [`RetryResult::Transient`] or
/// [`RetryResult::Fatal`], depending on
/// [`IsKnownTransient::is_known_transient`].
macro_rules! try_potentially_transient {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) if IsKnownTransient::is_known_transient(&error) => {
                debug!("Potentially transient error: {:?}", error);
                return ::keen_retry::RetryResult::Transient {
                    input: (),
                    error: From::from(error),
                };
            }
            Err(error) => {
                return ::keen_retry::RetryResult::Fatal {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

// Export the macro within the crate as if it were a normal symbol.
pub(crate) use try_potentially_transient;

/// Build an [`RetryResult::Ok`] value.
pub(crate) fn retry_result_ok<T, E>(output: T) -> RetryResult<(), (), T, E> {
    RetryResult::Ok {
        reported_input: (),
        output,
    }
}

/// Is this error a known transient error?
///
/// Errors are assumed to be permanent unless we know better. Retrying a
/// permanent error with exponential backoff just makes a batch slower to fail.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        prelude::*,
        processors::{ProcessorError, ProcessorErrorKind},
    };

    fn attempt(kind: Option<ProcessorErrorKind>) -> RetryResult<(), (), u32, ProcessorError> {
        let result = match kind {
            Some(kind) => Err(ProcessorError::new(kind, "attempt failed")),
            None => Ok(7),
        };
        retry_result_ok(try_potentially_transient!(result))
    }

    #[test]
    fn test_classifies_errors() {
        assert!(matches!(attempt(None), RetryResult::Ok { output: 7, .. }));
        assert!(matches!(
            attempt(Some(ProcessorErrorKind::QuotaExceeded)),
            RetryResult::Transient { .. }
        ));
        assert!(matches!(
            attempt(Some(ProcessorErrorKind::InvalidDocument)),
            RetryResult::Fatal { .. }
        ));
    }
}
