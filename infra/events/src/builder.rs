use crate::bus::EventBus;
use crate::config::BusConfig;
use crate::error::EventBusError;
use crate::event::Event;
use crate::handler::{ErrorSink, HandlerInvocationError, log_sink};
use crate::pattern::PatternSyntax;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Construction-time configuration of an [`EventBus`].
///
/// Starts from [`BusConfig::default`]; individual setters override single fields
/// of whatever [`config`](Self::config) supplied.
///
/// # Examples
/// ```rust
/// use relay_event_bus::{Envelope, EventBus, PatternSyntax};
///
/// let bus = EventBus::<Envelope<()>>::builder()
///     .max_concurrent_handlers(8)
///     .syntax(PatternSyntax::new('/', ">").unwrap())
///     .on_error(|error, namespace| eprintln!("{namespace}: {error}"))
///     .build()
///     .unwrap();
///
/// assert_eq!(bus.syntax().delimiter(), '/');
/// ```
pub struct EventBusBuilder<E> {
    config: BusConfig,
    on_error: Option<ErrorSink>,
    _event: PhantomData<fn() -> E>,
}

impl<E> Default for EventBusBuilder<E> {
    fn default() -> Self {
        Self { config: BusConfig::default(), on_error: None, _event: PhantomData }
    }
}

impl<E> fmt::Debug for EventBusBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBusBuilder")
            .field("config", &self.config)
            .field("custom_error_sink", &self.on_error.is_some())
            .finish()
    }
}

impl<E: Event> EventBusBuilder<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all settings with `config`, e.g. one produced by
    /// [`load_config`](crate::load_config).
    #[must_use]
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs the callback receiving every handler failure and the namespace
    /// being dispatched. Without one, failures are logged at `error` level.
    #[must_use]
    pub fn on_error<F>(mut self, sink: F) -> Self
    where
        F: Fn(&HandlerInvocationError, &str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(sink));
        self
    }

    #[must_use]
    pub const fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = Some(limit);
        self
    }

    /// Subscriptions per pattern above which a possible leak is reported. `0` disables it.
    #[must_use]
    pub const fn max_listeners(mut self, limit: usize) -> Self {
        self.config.max_listeners = limit;
        self
    }

    /// Timeout used by [`EventBus::shutdown`].
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn syntax(mut self, syntax: PatternSyntax) -> Self {
        self.config.delimiter = syntax.delimiter();
        self.config.deep_wildcard = syntax.deep_wildcard().to_owned();
        self
    }

    /// Validates the settings and creates an open bus.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidConfiguration`] if the concurrency limit is
    /// zero or above [`tokio::sync::Semaphore::MAX_PERMITS`], or the pattern
    /// syntax is unusable.
    pub fn build(self) -> Result<EventBus<E>, EventBusError> {
        self.config.validate()?;
        let syntax = self.config.syntax()?;

        Ok(EventBus::from_parts(
            syntax,
            self.config.max_listeners,
            self.config.max_concurrent_handlers,
            self.config.close_timeout(),
            self.on_error.unwrap_or_else(log_sink),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Envelope;
    use tokio::sync::Semaphore;

    type Bus = EventBus<Envelope<()>>;

    #[test]
    fn test_defaults_build() {
        let bus = Bus::builder().build().unwrap();
        assert_eq!(bus.syntax(), &PatternSyntax::default());
        assert_eq!(bus.subscriptions(), 0);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let err = Bus::builder().max_concurrent_handlers(0).build().unwrap_err();
        assert_eq!(err.as_label(), "invalid_configuration");
    }

    #[test]
    fn test_setters_override_config() {
        let config = BusConfig { max_listeners: 3, ..BusConfig::default() };
        let bus = Bus::builder()
            .config(config)
            .syntax(PatternSyntax::new(':', "#").unwrap())
            .close_timeout(Duration::from_millis(40))
            .build()
            .unwrap();

        assert_eq!(bus.syntax().delimiter(), ':');
        assert_eq!(bus.syntax().deep_wildcard(), "#");
        assert_eq!(bus.max_listeners(), 3);
        assert_eq!(bus.close_timeout(), Some(Duration::from_millis(40)));

        let bus = Bus::builder().config(BusConfig::default()).max_listeners(0).build().unwrap();
        assert_eq!(bus.max_listeners(), 0);
    }

    #[test]
    fn test_oversized_concurrency_is_rejected() {
        let err = Bus::builder().max_concurrent_handlers(usize::MAX).build().unwrap_err();
        assert_eq!(err.as_label(), "invalid_configuration");

        let bus = Bus::builder().max_concurrent_handlers(Semaphore::MAX_PERMITS).build();
        assert!(bus.is_ok());
    }

    #[test]
    fn test_invalid_config_syntax_is_rejected() {
        let config = BusConfig { deep_wildcard: "a.b".into(), ..BusConfig::default() };
        assert!(Bus::builder().config(config).build().is_err());
    }
}
