use anyhow::Result;
use clap::Parser;

use deedscout::{cli::handle_command, cli::Cli, utils::init_logger};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logger(cli.verbose);

    let all_succeeded = handle_command(&cli).await?;

    // Exit with appropriate code
    if !all_succeeded {
        std::process::exit(1);
    }

    Ok(())
}
