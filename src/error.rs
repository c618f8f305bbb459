//! Error kinds exposed by the dispatch runtime.
//!
//! One enum covers every kind named in the runtime's error taxonomy: two
//! kinds originate in the core (bad input, no registered handler), one
//! signals an internal build-time inconsistency, and three are transparent
//! re-exposures of failures that originated in user code or a collaborator.
//! The core never wraps a re-exposed failure in a way that loses its
//! identity — `HandlerFailure` carries the [`Raised`] envelope the
//! exception processor already walked, Arc-shared rather than
//! rebuilt, so a rethrown failure is the exact allocation a handler raised.

use thiserror::Error;

use crate::exception::Raised;

/// Errors produced by the dispatch runtime.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A `null`-equivalent argument was passed to the facade — an empty
    /// message, or a missing locator at construction time. Rust's value
    /// types make this unreachable for in-process calls (there is no null
    /// `M` or null `Arc<dyn Locator>`); the variant is kept so the error
    /// taxonomy stays stable for collaborators that do accept option-typed
    /// input (e.g. a locator built from optional configuration).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No terminal handler is registered for the dispatched message type.
    #[error("no handler registered for message type `{message_type}` (expected a {expected_role})")]
    NoHandler {
        message_type: &'static str,
        expected_role: &'static str,
    },

    /// Building the invoker for a concrete message type hit an internal
    /// inconsistency. Indicates a bug in the runtime itself, not in user
    /// registration — if you see this, please file an issue.
    #[error("could not build dispatch shape for `{message_type}`: {detail}")]
    NoDispatchShape {
        message_type: &'static str,
        detail: String,
    },

    /// A failure from pre-processing, middleware, the handler, or
    /// post-processing, after the exception processor declined to recover
    /// it. `raised` is the same envelope the exception processor walked —
    /// rethrowing it here rather than reformatting preserves the original
    /// failure's identity.
    #[error("unrecovered handler failure for `{message_type}`: {raised}")]
    HandlerFailure {
        message_type: &'static str,
        #[source]
        raised: Raised,
    },

    /// One or more notification handlers failed under the active publisher
    /// strategy. Sequential publishing surfaces exactly one failure (the
    /// first); parallel publishing aggregates every failure observed.
    #[error("{} notification handler(s) failed", sources.len())]
    PublisherFailure {
        sources: Vec<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Propagated verbatim from a collaborator that observed cancellation.
    /// Never generated by the core itself.
    #[error("operation cancelled")]
    OperationCancelled,
}

impl DispatchError {
    /// Raises a concrete user error as a recoverable [`HandlerFailure`](Self::HandlerFailure),
    /// tagging it with the message type name for diagnosability. This is
    /// the entry point handler, pre-processor, middleware, and
    /// post-processor implementations call to signal a failure the
    /// exception processor should be given a chance to recover —
    /// `E`'s concrete type is what the hierarchy walk matches against.
    pub fn raise<E>(message_type: &'static str, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::HandlerFailure {
            message_type,
            raised: Raised::new(error),
        }
    }
}
