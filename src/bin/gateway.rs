use sacco_gateway::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    server::run().await
}
