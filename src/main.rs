//! Node binary entry point. The HTTP/WS query surface, the CLI client,
//! and the visual explorer are external collaborators (spec §6) with
//! no implementation here; this binary only boots a node process:
//! load config, apply genesis once, run the writer task (leader) or
//! idle (follower) until a shutdown signal arrives.

use std::path::PathBuf;

use forge_mini_chain::config::NodeConfig;
use forge_mini_chain::genesis::GenesisFile;
use forge_mini_chain::node::Node;

fn load_config(args: &[String]) -> NodeConfig {
    match flag_value(args, "--config") {
        Some(path) => match NodeConfig::load(&PathBuf::from(path)) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load config: {err}");
                std::process::exit(1);
            }
        },
        None => NodeConfig::default(),
    }
}

fn load_genesis(args: &[String]) -> Option<GenesisFile> {
    let path = PathBuf::from(flag_value(args, "--genesis")?);
    match GenesisFile::load(&path) {
        Ok(genesis) => Some(genesis),
        Err(err) => {
            eprintln!("failed to load genesis file: {err}");
            std::process::exit(1);
        }
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let config = load_config(&args);
    let genesis = load_genesis(&args);

    log::info!(
        "starting forge-mini-chain: chain_id={} is_leader={} data_dir={}",
        config.chain_id,
        config.is_leader,
        config.data_dir.display()
    );

    let node = match Node::open(config, genesis) {
        Ok(node) => node,
        Err(err) => {
            log::error!("failed to open node: {err} (kind={})", err.kind_str());
            std::process::exit(1);
        }
    };

    let run_handle = node.run();
    tokio::select! {
        _ = run_handle => {
            log::info!("leader loop exited");
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("received ctrl-c");
        }
    }

    if let Err(err) = node.shutdown().await {
        log::error!("error during shutdown: {err}");
        std::process::exit(1);
    }
}
