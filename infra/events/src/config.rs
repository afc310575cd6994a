use crate::error::{EventBusError, EventBusErrorExt};
use crate::pattern::{DEFAULT_DEEP_WILDCARD, DEFAULT_DELIMITER, PatternSyntax};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::info;

/// Default soft limit of subscriptions per pattern before a leak warning.
pub const DEFAULT_MAX_LISTENERS: usize = 50;
/// Prefix of environment overrides, e.g. `RELAY__MAX_LISTENERS=100`.
pub const ENV_PREFIX: &str = "RELAY";

/// Construction-time settings of an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Upper bound of handler bodies running at once. `None` is unbounded.
    pub max_concurrent_handlers: Option<usize>,
    /// Subscriptions per pattern above which a warning is logged. `0` disables it.
    pub max_listeners: usize,
    /// Timeout applied by [`EventBus::shutdown`](crate::EventBus::shutdown).
    pub close_timeout_ms: Option<u64>,
    pub delimiter: char,
    pub deep_wildcard: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: None,
            max_listeners: DEFAULT_MAX_LISTENERS,
            close_timeout_ms: None,
            delimiter: DEFAULT_DELIMITER,
            deep_wildcard: DEFAULT_DEEP_WILDCARD.to_owned(),
        }
    }
}

impl BusConfig {
    #[must_use]
    pub const fn close_timeout(&self) -> Option<Duration> {
        match self.close_timeout_ms {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        }
    }

    /// Pattern syntax described by `delimiter` and `deep_wildcard`.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidConfiguration`] for an unusable marker.
    pub fn syntax(&self) -> Result<PatternSyntax, EventBusError> {
        PatternSyntax::new(self.delimiter, self.deep_wildcard.clone())
    }

    /// Checks the settings for values the bus cannot run with.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidConfiguration`] if `max_concurrent_handlers`
    /// is zero or above [`Semaphore::MAX_PERMITS`], or the pattern syntax is invalid.
    pub fn validate(&self) -> Result<(), EventBusError> {
        match self.max_concurrent_handlers {
            Some(0) => {
                return Err(EventBusError::InvalidConfiguration {
                    message: "max_concurrent_handlers must be greater than zero".into(),
                    context: None,
                });
            },
            Some(limit) if limit > Semaphore::MAX_PERMITS => {
                return Err(EventBusError::InvalidConfiguration {
                    message: format!(
                        "max_concurrent_handlers must not exceed {}",
                        Semaphore::MAX_PERMITS
                    )
                    .into(),
                    context: Some(format!("got {limit}").into()),
                });
            },
            _ => {},
        }
        self.syntax().map(|_| ())
    }
}

/// Loads a [`BusConfig`] from an optional file layered with `RELAY__*` environment overrides.
///
/// 1. **Defaults**: every field falls back to [`BusConfig::default`].
/// 2. **File**: when `path` is given the file must exist; its format follows the extension.
/// 3. **Environment**: variables prefixed with `RELAY__` win, e.g. `RELAY__MAX_LISTENERS=10`.
///
/// # Errors
/// Returns [`EventBusError::Config`] if the file is missing or malformed, and
/// [`EventBusError::InvalidConfiguration`] if the loaded values fail validation.
///
/// # Example
/// ```rust
/// use relay_event_bus::{BusConfig, load_config};
///
/// let cfg: BusConfig = load_config(None::<&str>).unwrap_or_default();
/// assert!(cfg.validate().is_ok());
/// ```
pub fn load_config(path: Option<impl AsRef<Path>>) -> Result<BusConfig, EventBusError> {
    load_layered(path, None)
}

/// `env` stands in for the process environment when given.
fn load_layered(
    path: Option<impl AsRef<Path>>,
    env: Option<config::Map<String, String>>,
) -> Result<BusConfig, EventBusError> {
    let mut builder = Config::builder();

    if let Some(path) = &path {
        let path: &Path = path.as_ref();
        info!("Loading event bus config from {}", path.display());
        builder = builder.add_source(File::from(path).required(true));
    }

    let config = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .convert_case(config::Case::Snake)
                .source(env),
        )
        .build()
        .context("Failed to build event bus config")?
        .try_deserialize::<BusConfig>()
        .context("Failed to deserialize event bus config")?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.max_listeners, DEFAULT_MAX_LISTENERS);
        assert_eq!(cfg.close_timeout(), None);
        assert_eq!(cfg.syntax().unwrap(), PatternSyntax::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let cfg = BusConfig { max_concurrent_handlers: Some(0), ..BusConfig::default() };
        assert!(matches!(cfg.validate(), Err(EventBusError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_oversized_concurrency_is_rejected() {
        let cfg = BusConfig { max_concurrent_handlers: Some(usize::MAX), ..BusConfig::default() };
        assert!(matches!(cfg.validate(), Err(EventBusError::InvalidConfiguration { .. })));

        let cfg = BusConfig {
            max_concurrent_handlers: Some(Semaphore::MAX_PERMITS),
            ..BusConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("bus.toml");
        fs::write(&path, "max_listeners = 5\nclose_timeout_ms = 250\ndeep_wildcard = \">\"\n")?;

        let cfg = load_config(Some(&path))?;
        assert_eq!(cfg.max_listeners, 5);
        assert_eq!(cfg.close_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.syntax()?.deep_wildcard(), ">");
        assert_eq!(cfg.max_concurrent_handlers, None);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_missing_file_is_an_error() {
        let err = load_config(Some("/definitely/not/here/bus.toml")).unwrap_err();
        assert_eq!(err.as_label(), "config");
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("bus.toml");
        fs::write(&path, "max_concurrent_handlers = 0\n")?;

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, EventBusError::InvalidConfiguration { .. }));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("bus.toml");
        fs::write(&path, "max_listeners = 5\nclose_timeout_ms = 250\n")?;

        let env = config::Map::from([
            ("RELAY__MAX_LISTENERS".to_owned(), "7".to_owned()),
            ("RELAY__MAX_CONCURRENT_HANDLERS".to_owned(), "4".to_owned()),
            ("UNRELATED__MAX_LISTENERS".to_owned(), "99".to_owned()),
        ]);
        let cfg = load_layered(Some(&path), Some(env))?;

        assert_eq!(cfg.max_listeners, 7);
        assert_eq!(cfg.max_concurrent_handlers, Some(4));
        assert_eq!(cfg.close_timeout(), Some(Duration::from_millis(250)));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_env_overrides_are_validated() {
        let env = config::Map::from([(
            "RELAY__MAX_CONCURRENT_HANDLERS".to_owned(),
            "0".to_owned(),
        )]);
        let err = load_layered(None::<&str>, Some(env)).unwrap_err();
        assert_eq!(err.as_label(), "invalid_configuration");
    }
}
