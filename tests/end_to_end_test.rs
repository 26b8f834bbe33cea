//! 端到端场景：注册 / 解析 + 派生 / 取消

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wirectx::{BoxError, Container, ContainerConfig, ContextError};

struct Logger {
    id: usize,
    prefix: String,
}

static NEXT_LOGGER: AtomicUsize = AtomicUsize::new(0);

fn build_logger(container: &Container) -> Result<Logger, BoxError> {
    let prefix = container
        .value_as::<&str>("service")
        .map(|name| name.to_string())
        .unwrap_or_else(|| "app".to_string());
    Ok(Logger {
        id: NEXT_LOGGER.fetch_add(1, Ordering::SeqCst),
        prefix,
    })
}

#[test]
fn test_logger_singleton_and_transient() {
    let singleton_root = Container::new();
    singleton_root.register_singleton(build_logger).unwrap();
    let a = singleton_root.resolve::<Logger>().unwrap();
    let b = singleton_root.resolve::<Logger>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.id, b.id);

    let transient_root = Container::new();
    transient_root.register_transient(build_logger).unwrap();
    let a = transient_root.resolve::<Logger>().unwrap();
    let b = transient_root.resolve::<Logger>().unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_ne!(a.id, b.id);
}

#[test]
fn test_values_and_cancellation() {
    let root = Container::new();
    root.set_value("k", "v");
    let child = root.with_value("k2", "v2");

    assert_eq!(child.value_as::<&str>("k").map(|v| *v), Some("v"));
    assert_eq!(child.value_as::<&str>("k2").map(|v| *v), Some("v2"));
    assert!(root.value("k2").is_none());

    root.cancel();
    assert!(root.done().is_done());
    assert!(root.err().is_some());
    assert!(child.done().wait_timeout(Duration::from_secs(2)));
}

#[test]
fn test_constructor_sees_forked_values() {
    let root = Container::new();
    root.set_value("service", "billing");
    root.register_transient(build_logger).unwrap();

    let request = root.with_value("service", "checkout");
    assert_eq!(root.resolve::<Logger>().unwrap().prefix, "billing");
    assert_eq!(request.resolve::<Logger>().unwrap().prefix, "checkout");
}

#[tokio::test]
async fn test_request_lifecycle_with_config() {
    let config = ContainerConfig::from_toml_str(
        r#"
        max_resolution_depth = 16

        [logging]
        level = "warn"
        format = "compact"
        "#,
    )
    .unwrap();
    let root = Container::with_config(config);
    root.register_singleton(build_logger).unwrap();

    let (request, cancel) = root.with_timeout(Duration::from_millis(200));
    let worker = tokio::spawn({
        let request = request.clone();
        async move {
            let logger = request.resolve::<Logger>().unwrap();
            tokio::select! {
                _ = request.done().wait() => format!("{} stopped: {:?}", logger.prefix, request.err()),
                _ = tokio::time::sleep(Duration::from_secs(5)) => "timed out".to_string(),
            }
        }
    });

    cancel.cancel();
    let outcome = worker.await.unwrap();
    assert_eq!(outcome, "app stopped: Some(Canceled)");
    assert_eq!(request.err(), Some(ContextError::Canceled));
    assert!(root.err().is_none());
}
