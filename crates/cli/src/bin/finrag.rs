use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    finrag_cli::main_entry().await
}
