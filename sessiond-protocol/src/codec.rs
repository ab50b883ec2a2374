//! Message codec for socket framing

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{ClientMessage, ServerMessage};

/// Maximum message size (16 MB)
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Codec for ClientMessage (encoding) and ServerMessage (decoding)
/// Used by the client side
#[derive(Debug, Default)]
pub struct ClientCodec;

impl ClientCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ClientCodec {
    type Item = ServerMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_message(src)
    }
}

impl Encoder<ClientMessage> for ClientCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst)
    }
}

/// Codec for ServerMessage (encoding) and ClientMessage (decoding)
/// Used by the manager side
#[derive(Debug, Default)]
pub struct ServerCodec;

impl ServerCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ServerCodec {
    type Item = ClientMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_message(src)
    }
}

impl Encoder<ServerMessage> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst)
    }
}

/// Decode a length-prefixed message
fn decode_message<T: serde::de::DeserializeOwned>(
    src: &mut BytesMut,
) -> Result<Option<T>, CodecError> {
    // Need at least 4 bytes for length prefix
    if src.len() < 4 {
        return Ok(None);
    }

    // Peek at length without consuming
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    // Check if we have the full message
    if src.len() < 4 + len {
        src.reserve(4 + len - src.len());
        return Ok(None);
    }

    src.advance(4);
    let data = src.split_to(len);

    let msg: T = bincode::deserialize(&data)?;
    Ok(Some(msg))
}

/// Encode a length-prefixed message
fn encode_message<T: serde::Serialize>(item: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
    let data = bincode::serialize(item)?;

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    dst.reserve(4 + data.len());
    dst.put_u32(data.len() as u32);
    dst.put_slice(&data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ControlRequest, ErrorCode};
    use crate::types::*;

    #[test]
    fn test_client_message_roundtrip() {
        let mut codec = ClientCodec::new();
        let mut server_codec = ServerCodec::new();

        let msg = ClientMessage::RegisterClient {
            previous_id: Some("1aaff00112233".into()),
            protocol_version: crate::PROTOCOL_VERSION,
        };

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();

        let decoded = server_codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_server_message_roundtrip() {
        let mut codec = ServerCodec::new();
        let mut client_codec = ClientCodec::new();

        let msg = ServerMessage::SaveComplete;

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();

        let decoded = client_codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_partial_message() {
        let mut codec = ClientCodec::new();
        let mut server_codec = ServerCodec::new();

        let msg = ClientMessage::GetProperties;

        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();

        // Split buffer to simulate partial read
        let mut partial = buf.split_to(2);
        assert!(server_codec.decode(&mut partial).unwrap().is_none());

        // Add rest of message
        partial.unsplit(buf);
        assert!(server_codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_message_too_large_on_decode() {
        let mut codec = ServerCodec::new();
        let mut buf = BytesMut::new();

        let huge_size: u32 = (MAX_MESSAGE_SIZE + 1) as u32;
        buf.put_u32(huge_size);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_all_client_message_variants() {
        let mut codec = ClientCodec::new();
        let mut server_codec = ServerCodec::new();

        let messages = vec![
            ClientMessage::RegisterClient {
                previous_id: None,
                protocol_version: crate::PROTOCOL_VERSION,
            },
            ClientMessage::SaveYourselfRequest {
                save_type: SaveType::Both,
                shutdown: true,
                interact_style: InteractStyle::Any,
                fast: false,
                global: true,
            },
            ClientMessage::SaveYourselfPhase2Request,
            ClientMessage::SaveYourselfDone { success: true },
            ClientMessage::InteractRequest {
                dialog_type: DialogType::Normal,
            },
            ClientMessage::InteractDone {
                cancel_shutdown: false,
            },
            ClientMessage::SetProperties {
                properties: vec![
                    SmProperty::text(prop::PROGRAM, "xedit"),
                    SmProperty::list(prop::RESTART_COMMAND, vec!["xedit".into()]),
                    SmProperty::card8(prop::RESTART_STYLE_HINT, RestartStyle::Anyway.code()),
                ],
            },
            ClientMessage::DeleteProperties {
                names: vec![prop::DISCARD_COMMAND.into()],
            },
            ClientMessage::GetProperties,
            ClientMessage::Control(ControlRequest::Checkpoint {
                session_name: String::new(),
            }),
        ];

        for msg in messages {
            let mut buf = BytesMut::new();
            codec.encode(msg.clone(), &mut buf).unwrap();
            let decoded = server_codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(msg, decoded);
        }
    }

    #[test]
    fn test_all_server_message_variants() {
        use crate::messages::{ControlEvent, ControlReply};

        let mut codec = ServerCodec::new();
        let mut client_codec = ClientCodec::new();

        let messages = vec![
            ServerMessage::RegisterClientReply {
                client_id: "1c0a80101000012345".into(),
            },
            ServerMessage::SaveYourself {
                save_type: SaveType::Local,
                shutdown: false,
                interact_style: InteractStyle::None,
                fast: false,
            },
            ServerMessage::SaveYourselfPhase2,
            ServerMessage::Interact,
            ServerMessage::SaveComplete,
            ServerMessage::ShutdownCancelled,
            ServerMessage::Die,
            ServerMessage::PropertiesReply {
                properties: vec![SmProperty::text(prop::PROGRAM, "xedit")],
            },
            ServerMessage::Error {
                code: ErrorCode::BadValue,
                message: "unknown previous id".into(),
            },
            ServerMessage::Control(ControlReply::State { state: 1 }),
            ServerMessage::Event(ControlEvent::StateChanged { old: 0, new: 1 }),
        ];

        for msg in messages {
            let mut buf = BytesMut::new();
            codec.encode(msg.clone(), &mut buf).unwrap();
            let decoded = client_codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(msg, decoded);
        }
    }

    #[test]
    fn test_multiple_messages_in_buffer() {
        let mut codec = ClientCodec::new();
        let mut server_codec = ServerCodec::new();

        let msg1 = ClientMessage::GetProperties;
        let msg2 = ClientMessage::SaveYourselfPhase2Request;
        let msg3 = ClientMessage::SaveYourselfDone { success: false };

        let mut buf = BytesMut::new();
        codec.encode(msg1.clone(), &mut buf).unwrap();
        codec.encode(msg2.clone(), &mut buf).unwrap();
        codec.encode(msg3.clone(), &mut buf).unwrap();

        assert_eq!(server_codec.decode(&mut buf).unwrap().unwrap(), msg1);
        assert_eq!(server_codec.decode(&mut buf).unwrap().unwrap(), msg2);
        assert_eq!(server_codec.decode(&mut buf).unwrap().unwrap(), msg3);

        // Buffer should be empty now
        assert!(server_codec.decode(&mut buf).unwrap().is_none());
    }
}
