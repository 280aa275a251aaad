use clap::Parser;
use log::{error, info};
use server::config::ServerArgs;
use server::network::Server;
use server::world::KinematicWorld;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = ServerArgs::parse();
    let config = args.session_config()?;
    let tick_duration = args.tick_duration()?;

    info!(
        "Starting server on {} at {} Hz (lobby {}/{} needed, {}s match)",
        args.bind_address(),
        args.tick_rate,
        config.min_participants,
        config.lobby_capacity,
        config.match_duration_secs
    );

    let mut server = Server::new(
        &args.bind_address(),
        tick_duration,
        Duration::from_secs(args.client_timeout),
        config,
        Box::new(KinematicWorld::new()),
    )
    .await?;

    tokio::select! {
        result = server.run() => {
            match result {
                Ok(reason) => info!("Session finished: {:?}", reason),
                Err(e) => {
                    error!("Server error: {}", e);
                    return Err(e);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    Ok(())
}
