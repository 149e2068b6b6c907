//! Wire protocol between game clients and the match server.
//!
//! JSON-object messages over a length-delimited TCP stream. Inbound messages
//! are decoded once into [`ClientMessage`]; the two wire spellings the clients
//! use (uppercase `command` keys and lowercase `type` keys) map onto the same
//! variants, and anything unrecognized collapses into [`ClientMessage::Unknown`].

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Base64 frames fit comfortably below this
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

// --- Inbound messages ---

/// One decoded client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Arm the session with an explicit target sign
    SetTarget { sign: String },
    /// Ask the server to pick a target at the given difficulty tier
    AssignTarget { difficulty: String },
    /// Record the player's dominant hand (validated downstream)
    SetDominance { dominance: String },
    /// Return the session to idle
    StopTarget,
    /// One webcam frame, base64 JPEG/PNG (None if the data field was absent)
    Image { image_data: Option<String> },
    /// Anything that matched no known shape
    Unknown,
}

/// A decoded message plus the optional player id rename that may ride on
/// any inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub player_id: Option<String>,
    pub message: ClientMessage,
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Decode one inbound frame.
///
/// Fails only on invalid JSON or a non-object payload; a syntactically valid
/// object that matches no command shape decodes to [`ClientMessage::Unknown`].
pub fn decode_client(bytes: &[u8]) -> Result<Envelope, serde_json::Error> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Some(obj) = value.as_object() else {
        return Err(serde::de::Error::custom("message is not a JSON object"));
    };

    let player_id = string_field(obj, "player_id")
        .or_else(|| obj.get("player_id").and_then(Value::as_u64).map(|n| n.to_string()));

    let command = string_field(obj, "command").map(|s| s.to_uppercase());
    let kind = string_field(obj, "type").map(|s| s.to_lowercase());
    let command = command.as_deref();
    let kind = kind.as_deref();

    let message = if command == Some("SET_TARGET") || kind == Some("set_target") {
        match string_field(obj, "sign") {
            Some(sign) => ClientMessage::SetTarget { sign },
            None => ClientMessage::Unknown,
        }
    } else if command == Some("ASSIGN_TARGET") || kind == Some("assign_target") {
        ClientMessage::AssignTarget {
            difficulty: string_field(obj, "difficulty").unwrap_or_else(|| "ANY".to_string()),
        }
    } else if command == Some("SET_DOMINANCE")
        || kind == Some("set_dominance")
        || kind == Some("player_config")
    {
        match string_field(obj, "dominance") {
            Some(dominance) => ClientMessage::SetDominance { dominance },
            None => ClientMessage::Unknown,
        }
    } else if command == Some("STOP_TARGET") || kind == Some("stop_target") {
        ClientMessage::StopTarget
    } else if kind == Some("image") {
        ClientMessage::Image {
            image_data: string_field(obj, "image_data").or_else(|| string_field(obj, "data")),
        }
    } else {
        ClientMessage::Unknown
    };

    Ok(Envelope { player_id, message })
}

// --- Outbound messages ---

/// Status reply: `status` plus whichever contextual fields apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusReply {
    fn bare(status: &str, player_id: &str) -> Self {
        Self {
            status: status.to_string(),
            player_id: Some(player_id.to_string()),
            target: None,
            dominance: None,
            difficulty: None,
            message: None,
        }
    }

    pub fn connected(player_id: &str, message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::bare("CONNECTED", player_id)
        }
    }

    pub fn target_set(player_id: &str, target: &str) -> Self {
        Self {
            target: Some(target.to_string()),
            ..Self::bare("TARGET_SET", player_id)
        }
    }

    pub fn target_assigned(player_id: &str, target: &str, difficulty: &str) -> Self {
        Self {
            target: Some(target.to_string()),
            difficulty: Some(difficulty.to_string()),
            ..Self::bare("TARGET_ASSIGNED", player_id)
        }
    }

    pub fn target_stopped(player_id: &str) -> Self {
        Self {
            target: Some("NONE".to_string()),
            ..Self::bare("TARGET_STOPPED", player_id)
        }
    }

    pub fn dominance_set(player_id: &str, dominance: &str) -> Self {
        Self {
            dominance: Some(dominance.to_string()),
            ..Self::bare("DOMINANCE_SET", player_id)
        }
    }

    pub fn error(player_id: &str, message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::bare("ERROR", player_id)
        }
    }

    pub fn unknown_command(player_id: &str) -> Self {
        Self {
            message: Some("Unrecognized command".to_string()),
            ..Self::bare("UNKNOWN_COMMAND", player_id)
        }
    }
}

/// Verdict reply for one submitted frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictReply {
    pub player_id: String,
    pub result: bool,
    pub feedback: String,
    pub target: String,
    pub score: f32,
}

/// Any outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerReply {
    Status(StatusReply),
    Verdict(VerdictReply),
}

// --- TCP codec helpers ---

pub type MessageStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Frame any byte stream with length-delimited framing.
pub fn framed<T: AsyncRead + AsyncWrite>(io: T) -> Framed<T, LengthDelimitedCodec> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec();
    Framed::new(io, codec)
}

/// Create a framed message stream over a TCP connection.
pub fn message_stream(stream: TcpStream) -> MessageStream {
    framed(stream)
}

/// Send a serializable message (JSON + length prefix).
pub async fn send_message<T, M>(
    stream: &mut Framed<T, LengthDelimitedCodec>,
    msg: &M,
) -> anyhow::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: Serialize,
{
    let data = serde_json::to_vec(msg)?;
    stream.send(Bytes::from(data)).await?;
    Ok(())
}

/// Receive and deserialize a message.
pub async fn recv_message<T, M>(stream: &mut Framed<T, LengthDelimitedCodec>) -> anyhow::Result<M>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: DeserializeOwned,
{
    match stream.next().await {
        Some(Ok(bytes)) => Ok(serde_json::from_slice(&bytes)?),
        Some(Err(e)) => Err(e.into()),
        None => Err(anyhow::anyhow!("connection closed")),
    }
}
