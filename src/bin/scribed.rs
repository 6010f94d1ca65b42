#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scribe_daemon::run().await
}
