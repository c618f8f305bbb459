//! The notification publisher (C8) — delivers a published
//! notification to its resolved handlers under a chosen fan-out strategy.
//! Notifications never enter the pipeline: no pre-processors, no
//! middleware, no post-processors, no exception handlers or actions run at
//! this level — a failing handler's error is only ever wrapped into
//! [`DispatchError::PublisherFailure`], never routed through the exception
//! processor.
//!
//! [`NotificationPublisher`] is deliberately not generic over the
//! notification type, so it stays object-safe and a single
//! `Arc<dyn NotificationPublisher>` can back every notification type a
//! dispatcher ever publishes via the facade's `.with_publisher(..)` builder.
//! The facade does the type-erasure: it resolves `Vec<Arc<dyn NotificationHandler<N>>>`
//! for the concrete `N`, maps each into a deferred [`BoxFuture`] (a Rust
//! future does no work until polled, so "start every handler callable
//! before awaiting any" just means handing the strategy the whole
//! `Vec<BoxFuture<_>>` up front), and only then calls into the strategy.

use crate::error::DispatchError;
use crate::future::BoxFuture;

/// A fan-out algorithm for notification delivery. `calls` is the
/// already-resolved, per-handler collection of deferred invocations — the
/// strategy decides only how to drive them, never what they are.
pub trait NotificationPublisher: Send + Sync + 'static {
    fn publish(&self, calls: Vec<BoxFuture<Result<(), DispatchError>>>) -> BoxFuture<Result<(), DispatchError>>;
}

/// Ordered, fail-fast fan-out — the default strategy. Handler *i* completes
/// happens-before handler *i+1* starts; the
/// first failure aborts the loop and propagates, so later handlers never run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialPublisher;

impl NotificationPublisher for SequentialPublisher {
    fn publish(&self, calls: Vec<BoxFuture<Result<(), DispatchError>>>) -> BoxFuture<Result<(), DispatchError>> {
        Box::pin(async move {
            for call in calls {
                if let Err(source) = call.await {
                    return Err(DispatchError::PublisherFailure {
                        sources: vec![Box::new(source)],
                    });
                }
            }
            Ok(())
        })
    }
}

/// Concurrent fan-out. Every handler runs
/// regardless of whether another fails; failures are aggregated into a
/// single [`DispatchError::PublisherFailure`] — Rust has no built-in
/// aggregate exception type, so every failure is kept rather than surfacing
/// only the first. Fast paths: zero handlers
/// completes immediately with no scheduled work; exactly one handler
/// returns its completion directly with no aggregate allocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParallelPublisher;

impl NotificationPublisher for ParallelPublisher {
    fn publish(&self, mut calls: Vec<BoxFuture<Result<(), DispatchError>>>) -> BoxFuture<Result<(), DispatchError>> {
        Box::pin(async move {
            match calls.len() {
                0 => Ok(()),
                1 => calls.pop().expect("length checked above").await,
                _ => {
                    let results = futures::future::join_all(calls).await;
                    let failures: Vec<Box<dyn std::error::Error + Send + Sync>> = results
                        .into_iter()
                        .filter_map(Result::err)
                        .map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
                        .collect();
                    if failures.is_empty() {
                        Ok(())
                    } else {
                        tracing::warn!(failed = failures.len(), "parallel publish: one or more handlers failed");
                        Err(DispatchError::PublisherFailure { sources: failures })
                    }
                }
            }
        })
    }
}
