#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = docrecognizer::run_worker().await {
        eprintln!("docrecognizer-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
