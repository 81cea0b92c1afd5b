//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`run`], [`validate`], or [`health`]. Each
//! handler lives in its own submodule.

pub mod health;
pub mod run;
pub mod validate;

use crate::cli::{Cli, Commands};
use crate::error::LivemockError;

pub async fn dispatch(cli: Cli) -> Result<(), LivemockError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Validate(ref args)) => validate::execute(args),
        Some(Commands::Health(args)) => health::execute(args).await,
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  livemock v{version}: mock HTTP service\n\n  \
         No command provided. To get started:\n\n    \
         livemock run                       Start with demo endpoints on :5003\n    \
         livemock run --store mocks.json    Keep definitions in a JSON file\n    \
         livemock --help                    See all commands and options\n"
    );
}
