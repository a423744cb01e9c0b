#[tokio::main]
async fn main() -> anyhow::Result<()> {
    arbor_cli::run_app().await
}
