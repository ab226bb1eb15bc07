use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mcpwatch::{
    dispatch_fn, instrument_server, with_session, Dispatch, ExporterKind, SessionContext,
    TelemetryConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    // Optional JSON config path; defaults to the console exporter.
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path))?;
            TelemetryConfig::from_json_str(&raw)?
        }
        None => TelemetryConfig {
            service_name: "demo-weather".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            exporter: ExporterKind::Console,
            batch_max_wait_ms: 200,
            ..Default::default()
        },
    };

    let server = dispatch_fn(|operation: String, args: Value| async move {
        match operation.as_str() {
            "tools/list" => Ok(json!({"tools": [{"name": "forecast"}]})),
            "tools/call" => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let city = args.get("city").and_then(Value::as_str).unwrap_or("nowhere");
                Ok(json!({"city": city, "forecast": "sunny"}))
            }
            other => Err(format!("unknown operation {}", other)),
        }
    });

    let (server, observability) = instrument_server(server, config)?;
    tracing::info!("Demo MCP server instrumented");

    let context = SessionContext::new("demo-session-1").with_correlation_id("trace-42");
    server.open_session(&context);
    with_session(context.clone(), async {
        let tools = server.invoke("tools/list", json!({})).await;
        tracing::info!(?tools, "tools/list answered");

        let forecast = server
            .invoke(
                "tools/call",
                json!({"city": "Lisbon", "api_key": "sk-demo-123456", "contact": "ops@example.com"}),
            )
            .await;
        tracing::info!(?forecast, "tools/call answered");

        if let Err(e) = server.invoke("resources/read", json!({})).await {
            tracing::warn!("Expected failure: {}", e);
        }
    })
    .await;
    server.close_session(&context.session_id);

    observability.shutdown().await;
    let stats = observability.stats();
    tracing::info!(
        emitted = stats.events_emitted,
        delivered = stats.events_delivered,
        "Demo finished"
    );
    Ok(())
}
