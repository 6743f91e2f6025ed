#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wein_lib::run().await
}
