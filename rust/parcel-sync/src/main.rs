use parcel_sync::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    parcel_sync::run().await
}
