use std::borrow::Cow;
use std::time::Duration;

/// Errors that can occur during event bus operations.
///
/// Only caller-facing mistakes and shutdown outcomes surface here. Failures of
/// the handlers themselves never cross the publish boundary; they are delivered
/// to the error sink as [`HandlerInvocationError`](crate::HandlerInvocationError).
#[relay_derive::relay_error]
pub enum EventBusError {
    /// The published event does not carry a namespace. This is a programmer error.
    #[error("Missing namespace{}: {message}", format_context(.context))]
    MissingNamespace { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A subscription pattern could not be parsed.
    #[error("Invalid pattern{}: {message}", format_context(.context))]
    InvalidPattern { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// `close` gave up waiting before all in-flight handlers finished.
    /// The handlers themselves keep running.
    #[error(
        "Drain timeout{}: {pending} handler invocation(s) still running after {timeout:?}",
        format_context(.context)
    )]
    DrainTimeout { timeout: Duration, pending: usize, context: Option<Cow<'static, str>> },

    /// `close` was called while another `close` is still draining the bus.
    #[error("Already closing{}: {message}", format_context(.context))]
    AlreadyClosing { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Dispatch requires a Tokio runtime to spawn handler invocations on.
    #[error("Runtime unavailable{}: {message}", format_context(.context))]
    RuntimeUnavailable { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// No matching event arrived within the requested time.
    #[error("Wait timeout{}: no '{message}' event within {timeout:?}", format_context(.context))]
    WaitTimeout {
        message: Cow<'static, str>,
        timeout: Duration,
        context: Option<Cow<'static, str>>,
    },

    /// The bus is shutting down or closed.
    #[error("Event bus closed{}: {message}", format_context(.context))]
    Closed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Invalid settings supplied through [`BusConfig`](crate::BusConfig) or the builder.
    #[error("Invalid configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Failure while loading layered configuration.
    #[error("Config error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },

    /// Internal logic errors.
    #[error("Internal event bus error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}
