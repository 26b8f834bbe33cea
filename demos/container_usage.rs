//! 容器使用示例
//!
//! cargo run --example container_usage

use std::sync::Arc;
use std::time::Duration;
use wirectx::logging::{init_logging, LoggingConfig, OperationTimer};
use wirectx::{BoxError, Container, ContainerError};

struct AppConfig {
    database_url: String,
}

struct Database {
    url: String,
}

struct UserRepository {
    db: Arc<Database>,
    tenant: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LoggingConfig::development()).map_err(|e| anyhow::anyhow!(e))?;

    let root = Container::new();
    root.set_value("tenant", "default");

    root.register_instance(AppConfig {
        database_url: "postgres://localhost/app".to_string(),
    })?;
    root.register_singleton(|c: &Container| {
        let config = c.resolve::<AppConfig>()?;
        Ok::<_, ContainerError>(Database {
            url: config.database_url.clone(),
        })
    })?;
    root.register_transient(|c: &Container| {
        let tenant = c
            .value_as::<&str>("tenant")
            .map(|t| t.to_string())
            .ok_or_else(|| BoxError::from("tenant missing"))?;
        Ok::<_, BoxError>(UserRepository {
            db: c.resolve::<Database>()?,
            tenant,
        })
    })?;

    let timer = OperationTimer::new("handle_request");
    let (request, cancel) = root.with_timeout(Duration::from_millis(500));
    let request = request.with_value("tenant", "acme");

    let repo = request.resolve::<UserRepository>()?;
    println!("tenant={} db={}", repo.tenant, repo.db.url);

    tokio::select! {
        _ = request.done().wait() => println!("request ended: {:?}", request.err()),
        _ = tokio::time::sleep(Duration::from_millis(100)) => {
            println!("work finished, releasing request");
            cancel.cancel();
        }
    }
    timer.finish();

    println!("{}", root.stats().performance_summary());
    Ok(())
}
