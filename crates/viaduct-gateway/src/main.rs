use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use viaduct_serve::prelude::*;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let root = load_tree()?;
    let extensions = Arc::new(build_extensions());

    let mut engine = ServeEngine::builder().build(root, extensions)?;
    engine.prepare()?;
    engine.initial()?;
    engine.startup(build_info()).await?;

    if let Some(addr) = engine.public_ready().await {
        info!(%addr, "gateway listening");
    }
    if let Some(addr) = engine.admin_ready().await {
        info!(%addr, "admin listening");
    }

    shutdown_signal().await;
    engine.shutdown(SHUTDOWN_DEADLINE).await?;
    Ok(())
}

fn init_tracing() {
    if tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .finish(),
    )
    .is_err()
    {
        // Subscriber already set by tests or an external runtime.
    }
}

fn build_extensions() -> Extensions {
    // Concrete backend transporters (dubbo, grpc, upstream http) register
    // here in deployments; the echo transporter backs the echo feature.
    Extensions::builder()
        .register_transporter(ECHO_PROTO, EchoTransporter::new())
        .build()
}

fn build_info() -> BuildInfo {
    BuildInfo {
        version: env::var("GATEWAY_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
        commit: env::var("GIT_COMMIT_HASH").unwrap_or_default(),
        date: env::var("BUILD_DATE").unwrap_or_default(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
