//! cairnd — parity-protected peer-to-peer storage node.

use anyhow::Result;

use cairn_core::config::NodeConfig;
use cairnd::node::Node;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = NodeConfig::from_args(&args)?;

    Node::start(config).await?.serve().await
}
