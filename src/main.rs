mod app;
mod catalog;
mod cli;
mod clock;
mod config;
mod coordinator;
mod daemon;
mod logging;
mod model;
mod paths;
mod policy;
mod query;
mod quota;
mod scheduler;
mod stats;
mod store;
mod transport;

use clap::Parser;

#[tokio::main]
async fn main() {
    if let Err(err) = app::run(cli::Cli::parse()).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
