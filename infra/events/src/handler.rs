use crate::registry::SubscriptionId;
use futures::future::BoxFuture;
use std::any::Any;
use std::future::{Future, Ready, ready};
use std::sync::Arc;
use thiserror::Error;

/// Boxed error a handler may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of one handler invocation.
pub type HandlerResult = Result<(), BoxError>;

/// Callback receiving every handler failure together with the dispatched namespace.
pub type ErrorSink = Arc<dyn Fn(&HandlerInvocationError, &str) + Send + Sync + 'static>;

/// Values a handler body may complete with.
///
/// Implemented for `()` (infallible handlers) and for `Result<(), E>` with any
/// error convertible into [`BoxError`].
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> HandlerResult;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> HandlerResult {
        Ok(())
    }
}

impl<E: Into<BoxError>> IntoHandlerResult for Result<(), E> {
    fn into_handler_result(self) -> HandlerResult {
        self.map_err(Into::into)
    }
}

/// Type-erased handler stored by the registry.
pub(crate) trait Handler<E>: Send + Sync + 'static {
    fn call(&self, event: Arc<E>) -> BoxFuture<'static, HandlerResult>;
}

impl<E, F, Fut> Handler<E> for F
where
    E: Send + Sync + 'static,
    F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn call(&self, event: Arc<E>) -> BoxFuture<'static, HandlerResult> {
        let fut = self(event);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

/// Adapts a synchronous closure into a handler.
///
/// The closure still runs on the dispatch task, so its panics and errors are
/// isolated exactly like those of async handlers.
///
/// ```rust
/// use relay_event_bus::{Envelope, EventBus, handler};
///
/// let bus = EventBus::<Envelope<u32>>::new();
/// bus.subscribe("metrics.tick", handler::sync(|event: &Envelope<u32>| {
///     assert!(*event.payload() > 0);
/// }))
/// .unwrap();
/// ```
pub fn sync<E, F, R>(f: F) -> impl Fn(Arc<E>) -> Ready<R> + Send + Sync + 'static
where
    E: Send + Sync + 'static,
    F: Fn(&E) -> R + Send + Sync + 'static,
    R: IntoHandlerResult + Send + 'static,
{
    move |event: Arc<E>| ready(f(&event))
}

/// Failure of a single handler invocation.
///
/// Never returned to the publisher; always delivered to the configured
/// [`ErrorSink`] together with the namespace that was being dispatched.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HandlerInvocationError {
    /// The handler completed with an error.
    #[error("handler {subscription} failed while handling '{namespace}': {source}")]
    Failed {
        namespace: Arc<str>,
        subscription: SubscriptionId,
        #[source]
        source: BoxError,
    },

    /// The handler panicked; the panic was caught at the invocation boundary.
    #[error("handler {subscription} panicked while handling '{namespace}': {message}")]
    Panicked { namespace: Arc<str>, subscription: SubscriptionId, message: String },
}

impl HandlerInvocationError {
    /// Namespace of the event whose dispatch failed.
    #[must_use]
    pub fn namespace(&self) -> &str {
        match self {
            Self::Failed { namespace, .. } | Self::Panicked { namespace, .. } => namespace,
        }
    }

    /// Subscription whose handler failed.
    #[must_use]
    pub const fn subscription(&self) -> SubscriptionId {
        match self {
            Self::Failed { subscription, .. } | Self::Panicked { subscription, .. } => *subscription,
        }
    }

    /// Returns a short stable label for use in logs/metrics.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "handler_failed",
            Self::Panicked { .. } => "handler_panicked",
        }
    }

    pub(crate) fn from_panic(
        namespace: Arc<str>,
        subscription: SubscriptionId,
        payload: &(dyn Any + Send),
    ) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panicked { namespace, subscription, message }
    }
}

/// Sink installed when the host does not provide one: logs every failure.
pub(crate) fn log_sink() -> ErrorSink {
    Arc::new(|error: &HandlerInvocationError, namespace: &str| {
        tracing::error!(
            namespace,
            subscription = %error.subscription(),
            kind = error.as_label(),
            error = %error,
            "Event handler failed"
        );
    })
}
