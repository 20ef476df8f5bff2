//! Hello World function served by the portico runtime.

use std::sync::Arc;

use portico_runtime::{
    register_function, Event, FunctionResponse, HandlerError, InvocationContext, RuntimeConfig,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize, Default)]
struct GreetRequest {
    name: Option<String>,
}

#[derive(Serialize)]
struct GreetResponse {
    message: String,
    function: String,
}

async fn greet(
    event: Event,
    ctx: Arc<InvocationContext>,
) -> Result<FunctionResponse, HandlerError> {
    let request: GreetRequest = event
        .data()
        .map(|data| serde_json::from_value(data.clone()))
        .transpose()?
        .unwrap_or_default();

    let name = request.name.as_deref().unwrap_or("World");
    info!(name = %name, cloud_event = event.is_cloud_event(), "processing greet request");

    Ok(FunctionResponse::json(&GreetResponse {
        message: format!("Hello, {}!", name),
        function: ctx.function_name().to_owned(),
    })?)
}

register_function!("handler", "main", greet);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("portico_runtime=info".parse()?),
        )
        .init();

    info!("portico runtime starting");

    let config = RuntimeConfig::from_env()?;
    let cancel = CancellationToken::new();

    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        portico_runtime::shutdown_signal().await;
        info!("shutdown signal received, initiating graceful shutdown");
        cancel_on_signal.cancel();
    });

    portico_runtime::run(config, cancel).await?;
    Ok(())
}
