use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side length of the square arena.
pub const WORLD_SIZE: f64 = 1000.0;
/// Radius a player (re)spawns with.
pub const PLAYER_START_RADIUS: f64 = 20.0;
/// Movement speed in units per second.
pub const PLAYER_SPEED: f64 = 150.0;
/// Slack added to reach checks to absorb client/server timing drift.
pub const CONSUME_BUFFER: f64 = 10.0;
/// A player must outweigh its victim by strictly more than this factor.
pub const CONSUME_MASS_RATIO: f64 = 1.5;
/// Motion integration period in milliseconds.
pub const MOTION_TICK_MS: u64 = 50;

/// One frame on the wire.
///
/// A `sender_id` of 0 means "the connection this frame arrived on"; the
/// server rewrites it to the session id before dispatch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Packet {
    pub sender_id: u64,
    pub msg: Msg,
}

impl Packet {
    pub fn new(sender_id: u64, msg: Msg) -> Self {
        Self { sender_id, msg }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Msg {
    Chat(ChatMessage),
    Id(IdMessage),
    LoginRequest(LoginRequestMessage),
    RegisterRequest(RegisterRequestMessage),
    DenyResponse(DenyResponseMessage),
    OkResponse,
    Player(PlayerMessage),
    PlayerDirection(PlayerDirectionMessage),
    Spore(SporeMessage),
    PlayerConsumed(PlayerConsumedMessage),
    SporeConsumed(SporeConsumedMessage),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub msg: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct IdMessage {
    pub id: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LoginRequestMessage {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegisterRequestMessage {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DenyResponseMessage {
    pub reason: String,
}

/// Full state of one player, keyed by its owning session id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerMessage {
    pub id: u64,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub direction: f64,
    pub speed: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PlayerDirectionMessage {
    /// Heading in radians.
    pub direction: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct SporeMessage {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PlayerConsumedMessage {
    pub player_id: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct SporeConsumedMessage {
    pub spore_id: u64,
}

impl Msg {
    pub fn chat(text: impl Into<String>) -> Self {
        Msg::Chat(ChatMessage { msg: text.into() })
    }

    pub fn id(id: u64) -> Self {
        Msg::Id(IdMessage { id })
    }

    pub fn login(username: impl Into<String>, password: impl Into<String>) -> Self {
        Msg::LoginRequest(LoginRequestMessage {
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn register(username: impl Into<String>, password: impl Into<String>) -> Self {
        Msg::RegisterRequest(RegisterRequestMessage {
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Msg::DenyResponse(DenyResponseMessage {
            reason: reason.into(),
        })
    }

    pub fn ok() -> Self {
        Msg::OkResponse
    }

    pub fn direction(direction: f64) -> Self {
        Msg::PlayerDirection(PlayerDirectionMessage { direction })
    }

    pub fn spore(id: u64, x: f64, y: f64, radius: f64) -> Self {
        Msg::Spore(SporeMessage { id, x, y, radius })
    }

    pub fn player_consumed(player_id: u64) -> Self {
        Msg::PlayerConsumed(PlayerConsumedMessage { player_id })
    }

    pub fn spore_consumed(spore_id: u64) -> Self {
        Msg::SporeConsumed(SporeConsumedMessage { spore_id })
    }

    /// Short variant name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Chat(_) => "Chat",
            Msg::Id(_) => "Id",
            Msg::LoginRequest(_) => "LoginRequest",
            Msg::RegisterRequest(_) => "RegisterRequest",
            Msg::DenyResponse(_) => "DenyResponse",
            Msg::OkResponse => "OkResponse",
            Msg::Player(_) => "Player",
            Msg::PlayerDirection(_) => "PlayerDirection",
            Msg::Spore(_) => "Spore",
            Msg::PlayerConsumed(_) => "PlayerConsumed",
            Msg::SporeConsumed(_) => "SporeConsumed",
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode packet: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode packet: {0}")]
    Decode(#[source] bincode::Error),
}

/// Serializes a packet into a single binary frame.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(packet).map_err(CodecError::Encode)
}

/// Parses a single binary frame.
pub fn decode(bytes: &[u8]) -> Result<Packet, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}
