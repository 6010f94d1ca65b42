#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scribectl::run().await
}
