//! Binary entry point: parses argv into a [`lerim::cli::Cli`] and hands it
//! to the dispatcher, which owns every exit-code decision (§6).

use clap::Parser;

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = cli::run(cli).await;
    std::process::exit(code);
}
