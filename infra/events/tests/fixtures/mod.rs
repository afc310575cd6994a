use futures::future::BoxFuture;
use parking_lot::Mutex;
use relay_event_bus::{Event, EventBus, EventNamespace, HandlerInvocationError};
use std::future::{Ready, ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub struct OrderCreated;
impl EventNamespace for OrderCreated {
    const NAMESPACE: &'static str = "order.created";
}

pub struct OrderShipped;
impl EventNamespace for OrderShipped {
    const NAMESPACE: &'static str = "order.shipped";
}

/// Event used across the integration suites. `Raw` allows arbitrary (or missing)
/// namespaces for wildcard and validation scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestEvent {
    Created(u64),
    Shipped(u64),
    Raw { namespace: Option<String>, seq: u64 },
}

impl TestEvent {
    #[must_use]
    pub fn at(namespace: &str) -> Self {
        Self::Raw { namespace: Some(namespace.to_owned()), seq: 0 }
    }

    #[must_use]
    pub const fn unnamespaced() -> Self {
        Self::Raw { namespace: None, seq: 0 }
    }

    #[must_use]
    pub const fn seq(&self) -> u64 {
        match self {
            Self::Created(seq) | Self::Shipped(seq) | Self::Raw { seq, .. } => *seq,
        }
    }
}

impl Event for TestEvent {
    fn namespace(&self) -> Option<&str> {
        match self {
            Self::Created(_) => Some(OrderCreated::NAMESPACE),
            Self::Shipped(_) => Some(OrderShipped::NAMESPACE),
            Self::Raw { namespace, .. } => namespace.as_deref(),
        }
    }
}

pub type TestBus = EventBus<TestEvent>;

/// Installs a test-writer `fmt` subscriber once per test binary; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Handler that increments `counter` synchronously.
pub fn counting(
    counter: &Arc<AtomicUsize>,
) -> impl Fn(Arc<TestEvent>) -> Ready<()> + Send + Sync + use<> {
    let counter = Arc::clone(counter);
    move |_event| {
        counter.fetch_add(1, Ordering::SeqCst);
        ready(())
    }
}

/// Handler that sleeps for `delay` before incrementing `counter`.
pub fn delayed_counting(
    counter: &Arc<AtomicUsize>,
    delay: Duration,
) -> impl Fn(Arc<TestEvent>) -> BoxFuture<'static, ()> + Send + Sync + use<> {
    let counter = Arc::clone(counter);
    move |_event| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }
}

/// Handler that panics as soon as it is called.
pub fn panicking(message: &'static str) -> impl Fn(Arc<TestEvent>) -> Ready<()> + Send + Sync {
    move |_event| -> Ready<()> { panic!("{message}") }
}

/// Failures observed by an error sink, as `(label, namespace)` pairs.
#[derive(Debug, Clone, Default)]
pub struct Failures(Arc<Mutex<Vec<(&'static str, String)>>>);

impl Failures {
    pub fn sink(&self) -> impl Fn(&HandlerInvocationError, &str) + Send + Sync + use<> {
        let inner = Arc::clone(&self.0);
        move |error, namespace| inner.lock().push((error.as_label(), namespace.to_owned()))
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<(&'static str, String)> {
        self.0.lock().clone()
    }
}

/// Waits until the bus reports no running handler invocations.
///
/// # Panics
/// If handlers are still running after two seconds.
pub async fn settle<E: Event>(bus: &EventBus<E>) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while bus.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("handlers did not settle");
}
