use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    hnet_cli::run().await?;
    Ok(())
}
