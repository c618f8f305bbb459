//! The message taxonomy: request-with-response, void-request, stream-request,
//! and notification.
//!
//! Every message type implements exactly one of [`Request`], [`StreamRequest`],
//! or [`Notification`]. A void request is modeled as a [`Request`] whose
//! response is [`Unit`] via the blanket impl below, so it shares pipeline
//! infrastructure with response-bearing requests instead of needing a parallel
//! set of traits and executors.

use std::fmt::Debug;

/// A zero-information response used to unify void-request dispatch with
/// response-bearing dispatch. Distinct from "no type" so the request executor
/// stays generic in the response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Unit;

/// A message that expects exactly one response of type [`Request::Response`].
pub trait Request: Send + Sync + 'static {
    /// The type produced by the registered request handler.
    type Response: Send + Sync + 'static;

    /// A stable name for this message type, used in diagnostics (`NoHandler`,
    /// `HandlerFailure`, log lines). Defaults to [`std::any::type_name`].
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Marker for requests with no response payload. Blanket-implements
/// [`Request`] with `Response = `[`Unit`], so void requests flow through the
/// exact same dispatch table, invoker cache, and pipeline composer as any
/// other request.
pub trait VoidRequest: Send + Sync + 'static {
    /// A stable name for this message type, used in diagnostics.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<T: VoidRequest> Request for T {
    type Response = Unit;

    fn type_name() -> &'static str {
        <T as VoidRequest>::type_name()
    }
}

/// A message that yields a lazy, finite-or-infinite sequence of
/// [`StreamRequest::Item`] values from a single dispatch.
pub trait StreamRequest: Send + Sync + 'static {
    /// The element type produced by the registered stream handler.
    type Item: Send + Sync + 'static;

    /// A stable name for this message type, used in diagnostics.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A fire-and-forget message delivered to zero or more handlers.
pub trait Notification: Send + Sync + Debug + 'static {
    /// A stable name for this message type, used in diagnostics.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;
    impl VoidRequest for Ping {}

    #[test]
    fn void_request_response_is_unit() {
        fn assert_response<T: Request<Response = Unit>>() {}
        assert_response::<Ping>();
    }

    #[test]
    fn type_name_defaults_to_any_type_name() {
        struct Named;
        impl VoidRequest for Named {}
        assert!(Named::type_name().ends_with("Named"));
    }
}
