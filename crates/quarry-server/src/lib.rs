pub mod config;
pub mod network;
pub mod packets;
pub mod protocol;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use config::ServerConfig;
use network::Shared;
use quarry_protocol_core::{default_allocator, BufAllocator, UnpooledAllocator};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Accept connections until `shutdown` flips to `true`, then wait for the
/// open connections to finish.
pub async fn serve(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let allocator: Arc<dyn BufAllocator> = if config.pooled_buffers {
        default_allocator()
    } else {
        Arc::new(UnpooledAllocator::default())
    };
    info!(
        "Packet buffers: {}",
        if allocator.is_pooled() { "pooled" } else { "unpooled" }
    );
    let shared = Shared {
        states: Arc::new(protocol::state_table(&config.limits)?),
        config,
        allocator,
        online: Arc::new(AtomicUsize::new(0)),
    };
    let mut tasks = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    info!("New connection from {}", peer);
                    tasks.spawn(network::handle_connection(
                        socket,
                        peer,
                        shared.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = shutdown.changed() => break,
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    info!("Waiting for {} connections to close", tasks.len());
    while tasks.join_next().await.is_some() {}
    Ok(())
}
