#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = docrecognizer::run().await {
        eprintln!("docrecognizer fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
