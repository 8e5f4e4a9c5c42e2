#[tokio::main]
async fn main() -> anyhow::Result<()> {
    huddle_server::run().await
}
