//! Compensator CLI entry point.

use clap::Parser;

use compensator::cli::context::load_config;
use compensator::cli::{commands, handle_error, Cli, Commands};
use compensator::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };
    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
        Commands::Tick(args) => commands::tick::execute(args, config, cli.json).await,
        Commands::Jobs(args) => commands::jobs::execute(args, config, cli.json).await,
        Commands::Scan(args) => commands::scan::execute(args, config, cli.json).await,
        Commands::Locks(args) => commands::locks::execute(args, config, cli.json).await,
        Commands::Record(args) => commands::record::execute(args, config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
