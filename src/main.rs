use callmesh::config::ServerConfig;
use callmesh::monitoring::run_debug_server;
use callmesh::room::RoomRegistry;
use callmesh::signaling::SignalingServer;
use log::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = ServerConfig::from_env();
    let registry = RoomRegistry::new(config.max_participants, config.max_room_id_len);

    if let Some(port) = config.debug_port {
        info!("Starting debug server on port {}", port);
        let debug_registry = registry.clone();
        tokio::spawn(async move {
            run_debug_server(debug_registry, port).await;
        });
    }

    let server = SignalingServer::new(config, registry);
    server.start().await?;
    Ok(())
}
