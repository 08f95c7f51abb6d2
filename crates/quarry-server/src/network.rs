use crate::config::ServerConfig;
use crate::packets::{Disconnect, ServerKeepAlive};
use crate::protocol::ClientContext;
use anyhow::Result;
use quarry_protocol_core::{
    BufAllocator, Connection, ProtocolSession, ProtocolState, StateTable,
};
use quarry_types::TextComponent;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info};

/// Everything a connection task shares with the rest of the server.
#[derive(Clone)]
pub struct Shared {
    pub config: Arc<ServerConfig>,
    pub states: Arc<StateTable<ClientContext>>,
    pub allocator: Arc<dyn BufAllocator>,
    pub online: Arc<AtomicUsize>,
}

/// Drive a single client connection until it closes, errors, or the server
/// shuts down.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Shared,
    shutdown: watch::Receiver<bool>,
) {
    let mut conn = Connection::new(
        stream,
        shared.config.limits.max_frame_len,
        shared.allocator.clone(),
    );
    let mut session = ProtocolSession::new(shared.states.clone(), shared.allocator.clone());
    let mut ctx = ClientContext::new(peer, shared.config.clone(), shared.online.clone());

    if let Err(e) = run(&mut conn, &mut session, &mut ctx, shutdown).await {
        debug!("Connection {} ended: {}", peer, e);
    }
    if let Some(profile) = &ctx.profile {
        info!("{} ({}) disconnected", profile.name, peer);
    }
}

async fn run(
    conn: &mut Connection,
    session: &mut ProtocolSession<ClientContext>,
    ctx: &mut ClientContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let period = Duration::from_secs(ctx.config.keep_alive_secs.max(1));
    let mut keep_alive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    while !session.is_closed() {
        tokio::select! {
            frame = conn.read_frame() => {
                let mut frame = frame?;
                let received = session.receive(ctx, &mut frame)?;
                for reply in &received.replies {
                    conn.write_frame(reply).await?;
                }
            }
            _ = keep_alive.tick(), if session.state() == ProtocolState::Play => {
                if let Some(id) = ctx.pending_keep_alive {
                    debug!("{} did not answer keep-alive {}", ctx.peer, id);
                    disconnect(conn, session, ctx, "Timed out").await?;
                    break;
                }
                let packet = session.send(ctx, ServerKeepAlive { id: rand::random() })?;
                conn.write_frame(&packet).await?;
            }
            _ = shutdown.changed() => {
                if session.state() == ProtocolState::Play {
                    disconnect(conn, session, ctx, "Server closed").await?;
                }
                break;
            }
        }
    }
    Ok(())
}

async fn disconnect(
    conn: &mut Connection,
    session: &mut ProtocolSession<ClientContext>,
    ctx: &mut ClientContext,
    reason: &str,
) -> Result<()> {
    session.close();
    let packet = session.send(
        ctx,
        Disconnect {
            reason: TextComponent::plain(reason),
        },
    )?;
    conn.write_frame(&packet).await
}
