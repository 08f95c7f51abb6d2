//! The packet catalogue served by quarry, grouped by protocol state.
//!
//! Serverbound packets decode, clientbound packets encode. Each also
//! implements the opposite direction so test clients can speak the protocol.

use quarry_protocol_core::{
    ByteBuf, Decode, DecodeResult, Encode, EncodeError, EncodeResult, Packet, MAX_STRING_LEN,
};
use quarry_types::{GameProfile, Identifier, ProfileProperty, TextComponent};
use uuid::Uuid;

/// Longest server address a handshake may carry.
pub const MAX_ADDRESS_LEN: usize = 255;
/// Longest player name accepted at login.
pub const MAX_NAME_LEN: usize = 16;
/// Longest chat message a client may send.
pub const MAX_CHAT_LEN: usize = 256;
const MAX_PROPERTIES: usize = 16;

// === Handshake ===

#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
}

impl Decode for Handshake {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        Ok(Handshake {
            protocol_version: buf.read_var_int()?,
            server_address: buf.read_string(MAX_ADDRESS_LEN)?,
            server_port: buf.read_u16()?,
            next_state: buf.read_var_int()?,
        })
    }
}

impl Encode for Handshake {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_var_int(self.protocol_version);
        buf.write_string_limited(&self.server_address, MAX_ADDRESS_LEN)?;
        buf.write_u16(self.server_port);
        buf.write_var_int(self.next_state);
        Ok(())
    }
}

// === Status ===

#[derive(Debug, Clone, PartialEq)]
pub struct StatusRequest;

impl Decode for StatusRequest {
    fn decode(_buf: &mut ByteBuf) -> DecodeResult<Self> {
        Ok(StatusRequest)
    }
}

impl Encode for StatusRequest {
    fn encode(&self, _buf: &mut ByteBuf) -> EncodeResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusResponse {
    pub json: String,
}

impl Decode for StatusResponse {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        Ok(StatusResponse {
            json: buf.read_string(MAX_STRING_LEN)?,
        })
    }
}

impl Encode for StatusResponse {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_string(&self.json)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PingRequest {
    pub payload: i64,
}

impl Decode for PingRequest {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        Ok(PingRequest {
            payload: buf.read_i64()?,
        })
    }
}

impl Encode for PingRequest {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_i64(self.payload);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PongResponse {
    pub payload: i64,
}

impl Decode for PongResponse {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        Ok(PongResponse {
            payload: buf.read_i64()?,
        })
    }
}

impl Encode for PongResponse {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_i64(self.payload);
        Ok(())
    }
}

// === Login ===

#[derive(Debug, Clone, PartialEq)]
pub struct LoginStart {
    pub name: String,
    pub uuid: Uuid,
}

impl Decode for LoginStart {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        Ok(LoginStart {
            name: buf.read_string(MAX_NAME_LEN)?,
            uuid: buf.read_uuid()?,
        })
    }
}

impl Encode for LoginStart {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_string_limited(&self.name, MAX_NAME_LEN)?;
        buf.write_uuid(&self.uuid);
        Ok(())
    }
}

/// Refuses a login. The reason is a JSON text component.
#[derive(Debug, Clone)]
pub struct LoginDisconnect {
    pub reason: TextComponent,
}

impl Encode for LoginDisconnect {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_string(&self.reason.to_json())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginSuccess {
    pub profile: GameProfile,
}

impl Decode for LoginSuccess {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        let uuid = buf.read_uuid()?;
        let name = buf.read_string(MAX_NAME_LEN)?;
        let properties = buf.read_array(MAX_PROPERTIES, |buf| {
            Ok(ProfileProperty {
                name: buf.read_string(64)?,
                value: buf.read_string(MAX_STRING_LEN)?,
                signature: buf.read_option(|buf| buf.read_string(1024))?,
            })
        })?;
        Ok(LoginSuccess {
            profile: GameProfile {
                uuid,
                name,
                properties,
            },
        })
    }
}

impl Encode for LoginSuccess {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_uuid(&self.profile.uuid);
        buf.write_string_limited(&self.profile.name, MAX_NAME_LEN)?;
        buf.write_array(&self.profile.properties, |buf, property| {
            buf.write_string(&property.name)?;
            buf.write_string(&property.value)?;
            buf.write_option(property.signature.as_ref(), |buf, sig| buf.write_string(sig))
        })
    }
}

// === Play ===

/// Keep-alive answer from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientKeepAlive {
    pub id: i64,
}

impl Decode for ClientKeepAlive {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        Ok(ClientKeepAlive { id: buf.read_i64()? })
    }
}

impl Encode for ClientKeepAlive {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_i64(self.id);
        Ok(())
    }
}

/// Keep-alive sent by the server; the client must echo the id.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerKeepAlive {
    pub id: i64,
}

impl Decode for ServerKeepAlive {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        Ok(ServerKeepAlive { id: buf.read_i64()? })
    }
}

impl Encode for ServerKeepAlive {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_i64(self.id);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub message: String,
}

impl Decode for ChatMessage {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        Ok(ChatMessage {
            message: buf.read_string(MAX_CHAT_LEN)?,
        })
    }
}

impl Encode for ChatMessage {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_string_limited(&self.message, MAX_CHAT_LEN)
    }
}

/// Mod channel traffic. The payload runs to the end of the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginMessage {
    pub channel: Identifier,
    pub data: Vec<u8>,
}

impl PluginMessage {
    /// Read with the payload capped at `max_data` bytes.
    pub fn read(buf: &mut ByteBuf, max_data: usize) -> DecodeResult<Self> {
        Ok(PluginMessage {
            channel: buf.read_identifier()?,
            data: buf.read_remaining_bytes(max_data)?,
        })
    }
}

impl Encode for PluginMessage {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_identifier(&self.channel)?;
        buf.write_bytes(&self.data);
        Ok(())
    }
}

/// A message shown in the chat window.
#[derive(Debug, Clone)]
pub struct SystemMessage {
    pub text: TextComponent,
}

/// A message shown above the hotbar.
#[derive(Debug, Clone)]
pub struct ActionBar {
    pub text: TextComponent,
}

/// Both [`SystemMessage`] and [`ActionBar`] travel as one system chat
/// packet: a JSON text component and an overlay flag.
pub fn encode_system_chat(packet: &dyn Packet, buf: &mut ByteBuf) -> EncodeResult<()> {
    let (text, overlay) = if let Some(message) = packet.downcast_ref::<SystemMessage>() {
        (&message.text, false)
    } else if let Some(bar) = packet.downcast_ref::<ActionBar>() {
        (&bar.text, true)
    } else {
        return Err(EncodeError::WrongPacketType {
            expected: "system chat",
            actual: packet.type_name(),
        });
    };
    buf.write_string(&text.to_json())?;
    buf.write_bool(overlay);
    Ok(())
}

/// Ends a play session. The reason is a JSON text component.
#[derive(Debug, Clone)]
pub struct Disconnect {
    pub reason: TextComponent,
}

impl Encode for Disconnect {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_string(&self.reason.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_roundtrip() {
        let handshake = Handshake {
            protocol_version: 767,
            server_address: "localhost".into(),
            server_port: 25565,
            next_state: 1,
        };
        let mut buf = ByteBuf::new();
        handshake.encode(&mut buf).unwrap();
        assert_eq!(Handshake::decode(&mut buf).unwrap(), handshake);
        assert!(!buf.is_readable());
    }

    #[test]
    fn test_login_start_rejects_long_name() {
        let mut buf = ByteBuf::new();
        buf.write_string("a_name_that_is_far_too_long").unwrap();
        buf.write_uuid(&Uuid::nil());
        assert!(LoginStart::decode(&mut buf).is_err());
        assert_eq!(buf.reader_index(), 0);
    }

    #[test]
    fn test_login_success_roundtrip() {
        let mut profile = GameProfile::offline("Steve");
        profile.properties.push(ProfileProperty {
            name: "textures".into(),
            value: "e30=".into(),
            signature: None,
        });
        let success = LoginSuccess { profile };
        let mut buf = ByteBuf::new();
        success.encode(&mut buf).unwrap();
        assert_eq!(LoginSuccess::decode(&mut buf).unwrap(), success);
    }

    #[test]
    fn test_plugin_message_payload_limit() {
        let message = PluginMessage {
            channel: Identifier::new("quarry", "hello"),
            data: vec![1, 2, 3, 4],
        };
        let mut buf = ByteBuf::new();
        message.encode(&mut buf).unwrap();

        assert!(PluginMessage::read(&mut buf.copy(), 3).is_err());
        assert_eq!(PluginMessage::read(&mut buf, 4).unwrap(), message);
        assert!(!buf.is_readable());
    }

    #[test]
    fn test_system_chat_overlay_flag() {
        let mut buf = ByteBuf::new();
        encode_system_chat(
            &ActionBar {
                text: TextComponent::plain("hi"),
            },
            &mut buf,
        )
        .unwrap();
        assert_eq!(buf.read_string(64).unwrap(), r#"{"text":"hi"}"#);
        assert!(buf.read_bool().unwrap());

        let err = encode_system_chat(&Disconnect { reason: TextComponent::plain("x") }, &mut buf);
        assert!(err.is_err());
    }
}
