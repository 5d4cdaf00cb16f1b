//! covergen CLI entry point.

use clap::Parser;

use covergen::cli::commands::run;
use covergen::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run::execute(cli.run, cli.json).await {
        Ok(terminal) => std::process::exit(terminal.exit_code()),
        Err(err) => covergen::cli::handle_error(err, cli.json),
    }
}
