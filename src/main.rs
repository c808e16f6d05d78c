use volunteer_checkin::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig::from_env())?;

    let result = volunteer_checkin::server::run().await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "server exited with an error");
    }

    shutdown_telemetry();
    result
}
