use clap::Parser;
use livepatch_exec::cli::Cli;
use livepatch_exec::run_main;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_main(cli).await
}
