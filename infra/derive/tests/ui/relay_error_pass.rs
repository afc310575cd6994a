use relay_derive::relay_error;
use std::borrow::Cow;
use std::time::Duration;

#[relay_error]
pub enum DemoError {
    #[error("IO error{}: {source}", format_context(.context))]
    Io {
        #[source]
        source: std::io::Error,
        context: Option<Cow<'static, str>>,
    },

    #[error("Drain timed out after {timeout:?}")]
    DrainTimeout { timeout: Duration },

    #[error("Internal error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

fn read() -> Result<Vec<u8>, DemoError> {
    let bytes = std::fs::read("/definitely/not/here").context("Reading fixture")?;
    Ok(bytes)
}

fn main() {
    let err = read().unwrap_err();
    assert_eq!(err.as_label(), "io");
    assert!(err.to_string().contains("(Reading fixture)"));

    let err = DemoError::DrainTimeout { timeout: Duration::from_millis(10) };
    assert_eq!(err.as_label(), "drain_timeout");

    let err: DemoError = "boom".into();
    assert_eq!(err.as_label(), "internal");
    assert_eq!(err.to_string(), "Internal error: boom");

    let err = Err::<(), _>(err).context("while testing").unwrap_err();
    assert_eq!(err.to_string(), "Internal error (while testing): boom");
}
