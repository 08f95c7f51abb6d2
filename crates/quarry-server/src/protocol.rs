//! Wires the packet catalogue into one [`Protocol`] per state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use quarry_protocol_core::{
    CodecLimits, Protocol, ProtocolState, RegistryError, SessionContext, SessionControl, StateTable,
};
use quarry_types::{GameProfile, TextComponent};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::packets::*;

/// Protocol version advertised in status responses.
pub const PROTOCOL_VERSION: i32 = 767;
pub const VERSION_NAME: &str = "1.21.1";

/// Per-connection state handed to every handler.
pub struct ClientContext {
    control: SessionControl,
    pub peer: SocketAddr,
    pub config: Arc<ServerConfig>,
    pub online: Arc<AtomicUsize>,
    pub profile: Option<GameProfile>,
    /// Id of the keep-alive sent last and not yet answered.
    pub pending_keep_alive: Option<i64>,
}

impl ClientContext {
    pub fn new(peer: SocketAddr, config: Arc<ServerConfig>, online: Arc<AtomicUsize>) -> Self {
        Self {
            control: SessionControl::default(),
            peer,
            config,
            online,
            profile: None,
            pending_keep_alive: None,
        }
    }

    /// Whether this connection holds one of the online player slots.
    pub fn holds_slot(&self) -> bool {
        self.profile.is_some()
    }
}

impl SessionContext for ClientContext {
    fn control(&mut self) -> &mut SessionControl {
        &mut self.control
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        if let Some(profile) = &self.profile {
            self.online.fetch_sub(1, Ordering::Relaxed);
            info!("{} left the game", profile.name);
        }
    }
}

/// Build the protocol table for every state.
pub fn state_table(limits: &CodecLimits) -> Result<StateTable<ClientContext>, RegistryError> {
    Ok(StateTable::new(handshake()?, status()?, login()?, play(limits)?))
}

fn handshake() -> Result<Protocol<ClientContext>, RegistryError> {
    Protocol::<ClientContext>::builder()
        .inbound(|b| {
            b.bind()
                .decode::<Handshake>()
                .packet::<Handshake>()
                .handler(|ctx, handshake| {
                    debug!(
                        "Handshake from {}: protocol={}, next_state={}",
                        ctx.peer, handshake.protocol_version, handshake.next_state
                    );
                    if handshake.protocol_version != PROTOCOL_VERSION {
                        warn!(
                            "Client {} has protocol version {}, expected {}",
                            ctx.peer, handshake.protocol_version, PROTOCOL_VERSION
                        );
                    }
                    let next = ProtocolState::from_handshake_intent(handshake.next_state)
                        .ok_or_else(|| anyhow!("Invalid next state: {}", handshake.next_state))?;
                    ctx.control.switch_to(next);
                    Ok(())
                });
        })
        .build()
}

fn status() -> Result<Protocol<ClientContext>, RegistryError> {
    Protocol::<ClientContext>::builder()
        .inbound(|b| {
            b.bind()
                .decode::<StatusRequest>()
                .packet::<StatusRequest>()
                .handler(|ctx, _| {
                    let json = status_json(&ctx.config, ctx.online.load(Ordering::Relaxed));
                    ctx.control.send(StatusResponse { json });
                    Ok(())
                });
            b.bind()
                .decode::<PingRequest>()
                .packet::<PingRequest>()
                .handler(|ctx, ping| {
                    ctx.control.send(PongResponse {
                        payload: ping.payload,
                    });
                    ctx.control.close();
                    Ok(())
                });
        })
        .outbound(|b| {
            b.bind().encode::<StatusResponse>();
            b.bind().encode::<PongResponse>();
        })
        .build()
}

fn status_json(config: &ServerConfig, online: usize) -> String {
    serde_json::json!({
        "version": { "name": VERSION_NAME, "protocol": PROTOCOL_VERSION },
        "players": { "max": config.max_players, "online": online },
        "description": TextComponent::plain(config.motd.clone()),
    })
    .to_string()
}

fn login() -> Result<Protocol<ClientContext>, RegistryError> {
    Protocol::<ClientContext>::builder()
        .inbound(|b| {
            b.bind()
                .decode::<LoginStart>()
                .packet::<LoginStart>()
                .handler(|ctx, start| {
                    info!("Login Start from: {} ({})", start.name, start.uuid);
                    let max = ctx.config.max_players as usize;
                    let claimed = ctx
                        .online
                        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| (n < max).then_some(n + 1))
                        .is_ok();
                    if !claimed {
                        ctx.control.send(LoginDisconnect {
                            reason: TextComponent::plain("The server is full"),
                        });
                        ctx.control.close();
                        return Ok(());
                    }
                    let profile = GameProfile::offline(start.name.clone());
                    ctx.control.send(LoginSuccess {
                        profile: profile.clone(),
                    });
                    ctx.profile = Some(profile);
                    ctx.control.switch_to(ProtocolState::Play);
                    Ok(())
                });
        })
        .outbound(|b| {
            b.bind().encode::<LoginDisconnect>();
            // Encryption request; online mode is not supported.
            b.bind();
            b.bind().encode::<LoginSuccess>();
        })
        .build()
}

fn play(limits: &CodecLimits) -> Result<Protocol<ClientContext>, RegistryError> {
    let max_chat = limits.max_string_len.min(MAX_CHAT_LEN);
    let max_plugin_data = limits.max_byte_array_len;
    Protocol::<ClientContext>::builder()
        .inbound(|b| {
            b.bind()
                .decode::<ClientKeepAlive>()
                .packet::<ClientKeepAlive>()
                .handler(|ctx, keep_alive| match ctx.pending_keep_alive.take() {
                    Some(id) if id == keep_alive.id => Ok(()),
                    Some(id) => bail!("Keep-alive id {} does not match {}", keep_alive.id, id),
                    None => bail!("Unsolicited keep-alive {}", keep_alive.id),
                });
            b.bind()
                .decode_with(move |buf| {
                    Ok(ChatMessage {
                        message: buf.read_string(max_chat)?,
                    })
                })
                .packet::<ChatMessage>()
                .processor(|_, chat| {
                    let trimmed = chat.message.trim();
                    if trimmed.len() != chat.message.len() {
                        chat.message = trimmed.to_string();
                    }
                    Ok(())
                })
                .handler(|ctx, chat| {
                    if chat.message.is_empty() {
                        return Ok(());
                    }
                    let name = ctx.profile.as_ref().map_or("?", |p| p.name.as_str());
                    let text = TextComponent::plain(format!("<{}> {}", name, chat.message));
                    info!("{}", text.text);
                    ctx.control.send(SystemMessage { text });
                    ctx.control.send(ActionBar {
                        text: TextComponent::plain("Message sent"),
                    });
                    Ok(())
                });
            b.bind()
                .decode_with(move |buf| PluginMessage::read(buf, max_plugin_data))
                .packet::<PluginMessage>()
                .handler(|ctx, message| {
                    debug!(
                        "Plugin message from {} on {}: {} bytes",
                        ctx.peer,
                        message.channel,
                        message.data.len()
                    );
                    Ok(())
                });
        })
        .outbound(|b| {
            b.bind().encode::<Disconnect>();
            b.bind().encode::<ServerKeepAlive>();
            b.bind()
                .encoder(encode_system_chat)
                .accept::<SystemMessage>()
                .accept::<ActionBar>();
            b.packet::<ServerKeepAlive>().processor(|ctx, keep_alive| {
                ctx.pending_keep_alive = Some(keep_alive.id);
            });
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_protocol_core::{ByteBuf, Dispatch, Encode, ProtocolError, ProtocolSession, UnpooledAllocator};

    fn client() -> ClientContext {
        ClientContext::new(
            "127.0.0.1:40000".parse().unwrap(),
            Arc::new(ServerConfig::default()),
            Arc::new(AtomicUsize::new(0)),
        )
    }

    fn session() -> (ProtocolSession<ClientContext>, ClientContext) {
        let states = Arc::new(state_table(&CodecLimits::default()).unwrap());
        let session = ProtocolSession::new(states, Arc::new(UnpooledAllocator::default()));
        (session, client())
    }

    fn frame(opcode: i32, packet: &impl Encode) -> ByteBuf {
        let mut buf = ByteBuf::new();
        buf.write_var_int(opcode);
        packet.encode(&mut buf).unwrap();
        buf
    }

    fn handshake(next_state: i32) -> ByteBuf {
        frame(
            0,
            &Handshake {
                protocol_version: PROTOCOL_VERSION,
                server_address: "localhost".into(),
                server_port: 25565,
                next_state,
            },
        )
    }

    #[test]
    fn test_state_table_builds() {
        let states = state_table(&CodecLimits::default()).unwrap();
        assert_eq!(states.get(ProtocolState::Play).outbound().opcode_of::<ActionBar>(), Some(2));
        assert_eq!(states.get(ProtocolState::Login).outbound().opcode_of::<LoginSuccess>(), Some(2));
    }

    #[test]
    fn test_status_sequence() {
        let (mut session, mut ctx) = session();
        session.receive(&mut ctx, &mut handshake(1)).unwrap();
        assert_eq!(session.state(), ProtocolState::Status);

        let mut received = session.receive(&mut ctx, &mut frame(0, &StatusRequest)).unwrap();
        let mut reply = received.replies.remove(0);
        assert_eq!(reply.read_var_int().unwrap(), 0);
        let json: serde_json::Value = serde_json::from_str(&reply.read_string(32767).unwrap()).unwrap();
        assert_eq!(json["players"]["max"], 20);
        assert_eq!(json["description"]["text"], "A Quarry Server");

        let mut received = session
            .receive(&mut ctx, &mut frame(1, &PingRequest { payload: 99 }))
            .unwrap();
        let mut pong = received.replies.remove(0);
        assert_eq!(pong.read_var_int().unwrap(), 1);
        assert_eq!(pong.read_i64().unwrap(), 99);
        assert!(session.is_closed());
    }

    #[test]
    fn test_invalid_intent_closes() {
        let (mut session, mut ctx) = session();
        let err = session.receive(&mut ctx, &mut handshake(5)).unwrap_err();
        assert!(matches!(err, ProtocolError::Handler { .. }));
        assert!(session.is_closed());
    }

    #[test]
    fn test_login_then_chat() {
        let (mut session, mut ctx) = session();
        session.receive(&mut ctx, &mut handshake(2)).unwrap();
        let login = LoginStart {
            name: "Alex".into(),
            uuid: uuid::Uuid::nil(),
        };
        let mut received = session.receive(&mut ctx, &mut frame(0, &login)).unwrap();
        assert_eq!(session.state(), ProtocolState::Play);
        assert_eq!(ctx.online.load(Ordering::Relaxed), 1);

        let mut success = received.replies.remove(0);
        assert_eq!(success.read_var_int().unwrap(), 2);
        let decoded = <LoginSuccess as quarry_protocol_core::Decode>::decode(&mut success).unwrap();
        assert_eq!(decoded.profile, GameProfile::offline("Alex"));

        let chat = ChatMessage {
            message: "  hello  ".into(),
        };
        let received = session.receive(&mut ctx, &mut frame(1, &chat)).unwrap();
        assert_eq!(received.dispatch, Dispatch::Handled);
        assert_eq!(received.replies.len(), 2);
        let mut message = received.replies[0].copy();
        assert_eq!(message.read_var_int().unwrap(), 2);
        assert_eq!(message.read_string(256).unwrap(), r#"{"text":"<Alex> hello"}"#);
        assert!(!message.read_bool().unwrap());
        let mut bar = received.replies[1].copy();
        assert_eq!(bar.read_var_int().unwrap(), 2);
        bar.read_string(256).unwrap();
        assert!(bar.read_bool().unwrap());

        let online = ctx.online.clone();
        drop(ctx);
        assert_eq!(online.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_chat_respects_string_limit() {
        let limits = CodecLimits {
            max_string_len: 4,
            ..Default::default()
        };
        let mut session = ProtocolSession::new(
            Arc::new(state_table(&limits).unwrap()),
            Arc::new(UnpooledAllocator::default()),
        );
        let mut ctx = client();
        session.receive(&mut ctx, &mut handshake(2)).unwrap();
        let login = LoginStart {
            name: "Alex".into(),
            uuid: uuid::Uuid::nil(),
        };
        session.receive(&mut ctx, &mut frame(0, &login)).unwrap();

        let chat = ChatMessage {
            message: "hello".into(),
        };
        let err = session.receive(&mut ctx, &mut frame(1, &chat)).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode { opcode: 1, .. }));
    }

    #[test]
    fn test_plugin_message_respects_byte_array_limit() {
        let limits = CodecLimits {
            max_byte_array_len: 8,
            ..Default::default()
        };
        let mut session = ProtocolSession::new(
            Arc::new(state_table(&limits).unwrap()),
            Arc::new(UnpooledAllocator::default()),
        );
        let mut ctx = client();
        session.receive(&mut ctx, &mut handshake(2)).unwrap();
        let login = LoginStart {
            name: "Alex".into(),
            uuid: uuid::Uuid::nil(),
        };
        session.receive(&mut ctx, &mut frame(0, &login)).unwrap();

        let small = PluginMessage {
            channel: quarry_types::Identifier::minecraft("brand"),
            data: b"vanilla".to_vec(),
        };
        let received = session.receive(&mut ctx, &mut frame(2, &small)).unwrap();
        assert_eq!(received.dispatch, Dispatch::Handled);

        let large = PluginMessage {
            data: vec![0; 9],
            ..small
        };
        let err = session.receive(&mut ctx, &mut frame(2, &large)).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode { opcode: 2, .. }));
    }

    #[test]
    fn test_full_server_refuses_login() {
        let (mut session, mut ctx) = session();
        ctx.online.store(20, Ordering::Relaxed);
        session.receive(&mut ctx, &mut handshake(2)).unwrap();
        let login = LoginStart {
            name: "Late".into(),
            uuid: uuid::Uuid::nil(),
        };
        let mut received = session.receive(&mut ctx, &mut frame(0, &login)).unwrap();
        assert!(session.is_closed());
        assert!(!ctx.holds_slot());
        assert_eq!(received.replies.remove(0).read_var_int().unwrap(), 0);
        assert_eq!(ctx.online.load(Ordering::Relaxed), 20);
    }

    #[test]
    fn test_keep_alive_round_trip() {
        let (mut session, mut ctx) = session();
        session.receive(&mut ctx, &mut handshake(2)).unwrap();
        let login = LoginStart {
            name: "Alex".into(),
            uuid: uuid::Uuid::nil(),
        };
        session.receive(&mut ctx, &mut frame(0, &login)).unwrap();

        session.send(&mut ctx, ServerKeepAlive { id: 7 }).unwrap();
        assert_eq!(ctx.pending_keep_alive, Some(7));
        session
            .receive(&mut ctx, &mut frame(0, &ClientKeepAlive { id: 7 }))
            .unwrap();
        assert_eq!(ctx.pending_keep_alive, None);

        let err = session
            .receive(&mut ctx, &mut frame(0, &ClientKeepAlive { id: 8 }))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Handler { .. }));
    }
}
