//! Envelope wire format.
//!
//! A frame is a 4-byte big-endian body length followed by a CBOR body. The
//! body is a flat, versioned record; [`decode_envelope`] checks the version,
//! the kind and the per-kind field rules before building an [`Envelope`].

use std::io;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{DecodeError, NetworkError};
use crate::types::{Envelope, EnvelopeKind, PeerId, PeerProfile};

pub const PROTOCOL_VERSION: u8 = 1;
const FRAME_HEADER_LEN: usize = 4;
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    version: u8,
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender_profile: Option<WireProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    info_a: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    info_b: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    info_c: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_port: Option<u16>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireProfile {
    id: ByteBuf,
    nickname: String,
    public_key: ByteBuf,
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        let mut wire = WireEnvelope {
            version: PROTOCOL_VERSION,
            kind: envelope.kind() as u8,
            ..WireEnvelope::default()
        };
        match envelope {
            Envelope::Connect {
                profile,
                reply_port,
            } => {
                wire.sender_profile = Some(WireProfile {
                    id: ByteBuf::from(profile.id.as_bytes().to_vec()),
                    nickname: profile.nickname.clone(),
                    public_key: ByteBuf::from(profile.public_key.clone()),
                });
                wire.reply_port = Some(*reply_port);
            }
            Envelope::LogOff { peer, nickname } => {
                wire.info_a = Some(peer_bytes(peer));
                wire.info_b = Some(nickname.clone());
            }
            Envelope::NickUpdate {
                peer,
                old_nick,
                new_nick,
            } => {
                wire.info_a = Some(peer_bytes(peer));
                wire.info_b = Some(old_nick.clone());
                wire.info_c = Some(new_nick.clone());
            }
            Envelope::Message {
                peer,
                nickname,
                payload,
            } => {
                wire.info_a = Some(peer_bytes(peer));
                wire.info_b = Some(nickname.clone());
                wire.payload = Some(ByteBuf::from(payload.clone()));
            }
        }
        wire
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = DecodeError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        if wire.version != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(wire.version));
        }
        let kind = EnvelopeKind::try_from(wire.kind).map_err(DecodeError::UnknownKind)?;
        let name = kind.as_str();

        match kind {
            EnvelopeKind::Connect => {
                reject(name, "info_a", wire.info_a.is_some())?;
                reject(name, "info_b", wire.info_b.is_some())?;
                reject(name, "info_c", wire.info_c.is_some())?;
                reject(name, "payload", wire.payload.is_some())?;
                let profile = require(name, "sender_profile", wire.sender_profile)?;
                let reply_port = require(name, "reply_port", wire.reply_port)?;
                if reply_port == 0 {
                    return Err(DecodeError::InvalidReplyPort);
                }
                Ok(Envelope::Connect {
                    profile: PeerProfile {
                        id: parse_peer(&profile.id)?,
                        nickname: profile.nickname,
                        public_key: profile.public_key.into_vec(),
                    },
                    reply_port,
                })
            }
            EnvelopeKind::LogOff => {
                reject_connect_fields(name, &wire)?;
                reject(name, "info_c", wire.info_c.is_some())?;
                reject(name, "payload", wire.payload.is_some())?;
                let peer = parse_peer(&require(name, "info_a", wire.info_a)?)?;
                Ok(Envelope::LogOff {
                    peer,
                    nickname: wire.info_b.unwrap_or_default(),
                })
            }
            EnvelopeKind::NickUpdate => {
                reject_connect_fields(name, &wire)?;
                reject(name, "payload", wire.payload.is_some())?;
                let peer = parse_peer(&require(name, "info_a", wire.info_a)?)?;
                Ok(Envelope::NickUpdate {
                    peer,
                    old_nick: require(name, "info_b", wire.info_b)?,
                    new_nick: require(name, "info_c", wire.info_c)?,
                })
            }
            EnvelopeKind::Message => {
                reject_connect_fields(name, &wire)?;
                reject(name, "info_c", wire.info_c.is_some())?;
                let peer = parse_peer(&require(name, "info_a", wire.info_a)?)?;
                let payload = require(name, "payload", wire.payload)?;
                Ok(Envelope::Message {
                    peer,
                    nickname: wire.info_b.unwrap_or_default(),
                    payload: payload.into_vec(),
                })
            }
        }
    }
}

fn peer_bytes(peer: &PeerId) -> ByteBuf {
    ByteBuf::from(peer.as_bytes().to_vec())
}

fn parse_peer(bytes: &[u8]) -> Result<PeerId, DecodeError> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| DecodeError::InvalidPeerId(bytes.len()))?;
    Ok(PeerId::from_bytes(raw))
}

fn require<T>(kind: &'static str, field: &'static str, value: Option<T>) -> Result<T, DecodeError> {
    value.ok_or(DecodeError::MissingField { kind, field })
}

fn reject(kind: &'static str, field: &'static str, present: bool) -> Result<(), DecodeError> {
    if present {
        return Err(DecodeError::UnexpectedField { kind, field });
    }
    Ok(())
}

fn reject_connect_fields(kind: &'static str, wire: &WireEnvelope) -> Result<(), DecodeError> {
    reject(kind, "sender_profile", wire.sender_profile.is_some())?;
    reject(kind, "reply_port", wire.reply_port.is_some())
}

/// Serialize an envelope body (without the length prefix).
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, NetworkError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&WireEnvelope::from(envelope), &mut buf).map_err(|err| match err {
        ciborium::ser::Error::Io(io) => NetworkError::Io(io),
        other => NetworkError::Io(std::io::Error::other(other.to_string())),
    })?;
    Ok(buf)
}

/// Parse and validate an envelope body.
pub fn decode_envelope(body: &[u8]) -> Result<Envelope, DecodeError> {
    let wire: WireEnvelope =
        ciborium::de::from_reader(body).map_err(|err| DecodeError::Cbor(err.to_string()))?;
    Envelope::try_from(wire)
}

/// Length-prefixed frame ready to be written to a socket.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, NetworkError> {
    let body = encode_envelope(envelope)?;
    let len = u32::try_from(body.len()).map_err(|_| NetworkError::FrameTooLarge(body.len()))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub async fn read_envelope<R>(reader: &mut R, max_len: usize) -> Result<Envelope, NetworkError>
where
    R: AsyncReadExt + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > max_len {
        return Err(DecodeError::FrameTooLarge { len, max: max_len }.into());
    }
    // Grow with the data actually received rather than trusting the header.
    let mut body = Vec::with_capacity(len.min(INITIAL_BODY_CAPACITY));
    reader.take(len as u64).read_to_end(&mut body).await?;
    if body.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("frame body truncated at {} of {len} bytes", body.len()),
        )
        .into());
    }
    Ok(decode_envelope(&body)?)
}

pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<(), NetworkError>
where
    W: AsyncWriteExt + Unpin,
{
    let frame = encode_frame(envelope)?;
    write_frame(writer, &frame).await
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), NetworkError>
where
    W: AsyncWriteExt + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
