#[tokio::main]
async fn main() -> anyhow::Result<()> {
  crocstore_lib::run().await
}
