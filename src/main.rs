#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eventlog_sync::server::run().await
}
