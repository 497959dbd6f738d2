#[tokio::main]
async fn main() -> eyre::Result<()> {
    jobrelay::run().start().await
}
