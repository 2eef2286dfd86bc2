//! envctl binary entry point

use std::process::ExitCode;

use clap::Parser;

use envctl::app;
use envctl::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    app::run(cli).await
}
