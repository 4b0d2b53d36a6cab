//! myserver - a programmable MySQL wire-protocol server frontend
//!
//! Accepts connections from unmodified MySQL clients, answers commands from
//! user-configured rules, and forwards anything the rules leave unanswered
//! to an upstream database through the driver layer.

use std::path::PathBuf;

use log::info;

use myserver::rules::loader;
use myserver::{Config, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = Config::default();
    let mut rule_files: Vec<PathBuf> = Vec::new();

    // Simple argument parsing
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                if i + 1 < args.len() {
                    config.port = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--interface" => {
                if i + 1 < args.len() {
                    config.interface = args[i + 1].clone();
                    i += 1;
                }
            }
            "--dsn" => {
                if i + 1 < args.len() {
                    config.dsn = args[i + 1].clone();
                    i += 1;
                }
            }
            "--dsn_user" => {
                if i + 1 < args.len() {
                    config.dsn_user = args[i + 1].clone();
                    i += 1;
                }
            }
            "--dsn_password" => {
                if i + 1 < args.len() {
                    config.dsn_password = args[i + 1].clone();
                    i += 1;
                }
            }
            "--remote_dsn" => {
                if i + 1 < args.len() {
                    config.remote_dsn = args[i + 1].clone();
                    i += 1;
                }
            }
            "--remote_dsn_user" => {
                if i + 1 < args.len() {
                    config.remote_dsn_user = args[i + 1].clone();
                    i += 1;
                }
            }
            "--remote_dsn_password" => {
                if i + 1 < args.len() {
                    config.remote_dsn_password = args[i + 1].clone();
                    i += 1;
                }
            }
            "--config" => {
                if i + 1 < args.len() {
                    rule_files.push(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--debug" => {
                config.debug = true;
            }
            "--help" | "-h" => {
                println!("myserver - a programmable MySQL wire-protocol server frontend");
                println!();
                println!("Usage: myserver [OPTIONS]");
                println!();
                println!("Options:");
                println!("  --port PORT                Port to listen on (default: 23306)");
                println!("  --interface ADDR           Interface to bind (default: 127.0.0.1; 0.0.0.0 binds all)");
                println!("  --dsn DSN                  Default upstream DSN to forward queries to");
                println!("  --dsn_user USER            Username for the default DSN");
                println!("  --dsn_password PASS        Password for the default DSN");
                println!("  --remote_dsn DSN           Remote DSN seeded into each connection");
                println!("  --remote_dsn_user USER     Username for the remote DSN");
                println!("  --remote_dsn_password PASS Password for the remote DSN");
                println!("  --config FILE              Rule file (repeatable, loaded in order)");
                println!("  --debug                    Verbose logging");
                println!("  -h, --help                 Show this help");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .default_filter_or(if config.debug { "debug" } else { "info" }),
    )
    .init();

    let rules = loader::load_rules(&rule_files)?;
    info!(
        "Loaded {} rules from {} files",
        rules.len(),
        rule_files.len()
    );

    let server = Server::new(config, rules)?;
    server.run().await?;

    Ok(())
}
