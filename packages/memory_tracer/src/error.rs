use thiserror::Error;

/// Errors that can occur when tracing memory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The allocation tracking facility is already engaged, either by another tracer or by
    /// some other component of the process. Only one tracing session may exist at a time.
    #[error("cannot start to trace when already tracing")]
    AlreadyTracing,

    /// The operation requires an active tracing session but there is none.
    #[error("memory allocations are not being traced")]
    NotTracing,

    /// The process facility was asked to engage but the tracking [`Allocator`][crate::Allocator]
    /// is not registered as the global allocator, so no allocation would ever be recorded.
    #[error("the tracking allocator is not registered as the global allocator")]
    AllocatorNotInstalled,

    /// A custom allocation tracking facility failed. The original error is preserved as-is.
    #[error("allocation tracking facility failed")]
    Facility {
        /// The error reported by the facility.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Wraps a failure of a custom allocation tracking facility.
    pub fn facility(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Facility {
            source: source.into(),
        }
    }
}

/// A specialized `Result` type for memory tracer operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::error::Error as _;
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn already_tracing_message() {
        assert_eq!(
            Error::AlreadyTracing.to_string(),
            "cannot start to trace when already tracing"
        );
    }

    #[test]
    fn facility_error_keeps_source() {
        let error = Error::facility("disk on fire");

        let source = error.source().expect("facility errors always have a source");
        assert_eq!(source.to_string(), "disk on fire");
    }
}
