use anyhow::Result;
use clap::Parser;
use omr_eval::cli::Cli;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("omr_eval=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    cli.run()
}
