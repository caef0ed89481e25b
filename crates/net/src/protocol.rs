//! Packets exchanged between a participant and the authority.
//!
//! Every packet travels as a one-byte [`PacketTag`] plus a postcard-encoded body.
//! Commands inside bodies keep their binary record form.

use colonysync_core::Command;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Protocol version, part of the ALPN string.
pub const PROTOCOL_VERSION: u16 = 1;

/// Port the authority listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 30502;

/// Maximum participant name length (bytes).
pub const MAX_NAME_LEN: usize = 64;

/// Maximum length of disconnect reasons and notifications (bytes).
pub const MAX_TEXT_LEN: usize = 1024;

/// Maximum number of participants in a player list.
pub const MAX_PLAYERS: usize = 256;

/// Packet identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketTag {
    /// Participant name; first packet of a session.
    Username = 0,
    /// Ask for the world document.
    RequestWorld = 1,
    /// World loaded and caught up.
    WorldLoaded = 2,
    /// Region loaded and caught up.
    RegionLoaded = 3,
    /// Ask for an encounter region at a world tile.
    EncounterRequest = 4,
    /// A save written by an autosave.
    AutosavedData = 5,
    /// The authority is dropping the participant.
    DisconnectReason = 64,
    /// World document plus the commands issued since it was written.
    WorldData = 65,
    /// One scheduled command.
    Command = 66,
    /// Names of connected participants.
    PlayerList = 67,
    /// Region document plus its pending commands.
    RegionResponse = 68,
    /// New horizon.
    TimeControl = 69,
    /// Text to show the player.
    Notification = 70,
}

impl PacketTag {
    /// Every tag, client packets first.
    pub const ALL: [PacketTag; 13] = [
        PacketTag::Username,
        PacketTag::RequestWorld,
        PacketTag::WorldLoaded,
        PacketTag::RegionLoaded,
        PacketTag::EncounterRequest,
        PacketTag::AutosavedData,
        PacketTag::DisconnectReason,
        PacketTag::WorldData,
        PacketTag::Command,
        PacketTag::PlayerList,
        PacketTag::RegionResponse,
        PacketTag::TimeControl,
        PacketTag::Notification,
    ];

    /// Whether participants send this packet.
    pub fn is_client_packet(self) -> bool {
        (self as u8) < PacketTag::DisconnectReason as u8
    }
}

impl TryFrom<u8> for PacketTag {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> anyhow::Result<Self> {
        PacketTag::ALL
            .into_iter()
            .find(|tag| *tag as u8 == value)
            .ok_or_else(|| anyhow::anyhow!("Invalid packet tag: {}", value))
    }
}

impl fmt::Display for PacketTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A command carried as its binary record inside a packet body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord(pub Command);

impl From<Command> for CommandRecord {
    fn from(command: Command) -> Self {
        Self(command)
    }
}

impl Serialize for CommandRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = self.0.encode().map_err(serde::ser::Error::custom)?;
        serializer.serialize_bytes(&bytes)
    }
}

impl<'de> Deserialize<'de> for CommandRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl Visitor<'_> for RecordVisitor {
            type Value = CommandRecord;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a command record")
            }

            fn visit_bytes<E: de::Error>(self, bytes: &[u8]) -> Result<CommandRecord, E> {
                Command::decode(bytes).map(CommandRecord).map_err(E::custom)
            }
        }

        deserializer.deserialize_bytes(RecordVisitor)
    }
}

/// A packet body with a fixed tag.
pub trait Packet: Serialize + for<'de> Deserialize<'de> {
    /// Tag the body travels under.
    const TAG: PacketTag;

    /// Verify limits on a received body.
    fn verify(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

fn check_text(text: &str, limit: usize, what: &'static str) -> Result<(), &'static str> {
    if text.len() > limit {
        return Err(what);
    }
    Ok(())
}

/// Participant name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Username {
    /// Name the participant plays as.
    pub name: String,
}

impl Packet for Username {
    const TAG: PacketTag = PacketTag::Username;

    fn verify(&self) -> Result<(), &'static str> {
        if self.name.is_empty() {
            return Err("Username is empty");
        }
        check_text(&self.name, MAX_NAME_LEN, "Username too long")
    }
}

/// Ask for the world document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestWorld;

impl Packet for RequestWorld {
    const TAG: PacketTag = PacketTag::RequestWorld;
}

/// The world has been loaded and caught up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldLoaded;

impl Packet for WorldLoaded {
    const TAG: PacketTag = PacketTag::WorldLoaded;
}

/// A region has been loaded and caught up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionLoaded;

impl Packet for RegionLoaded {
    const TAG: PacketTag = PacketTag::RegionLoaded;
}

/// Ask for the encounter region at a world tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterRequest {
    /// World tile.
    pub tile: i32,
}

impl Packet for EncounterRequest {
    const TAG: PacketTag = PacketTag::EncounterRequest;
}

/// A document written by an autosave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosavedData {
    /// Whether `data` is the whole world rather than one region.
    pub is_world: bool,
    /// Document bytes.
    pub data: Vec<u8>,
}

impl Packet for AutosavedData {
    const TAG: PacketTag = PacketTag::AutosavedData;
}

/// The authority is dropping the participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    /// Why.
    pub reason: String,
}

impl Packet for DisconnectReason {
    const TAG: PacketTag = PacketTag::DisconnectReason;

    fn verify(&self) -> Result<(), &'static str> {
        check_text(&self.reason, MAX_TEXT_LEN, "Disconnect reason too long")
    }
}

/// World document plus every command issued after it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldData {
    /// Horizon at the time of sending.
    pub tick_until: i32,
    /// Pending commands in issue order.
    pub commands: Vec<CommandRecord>,
    /// World document bytes.
    pub world: Vec<u8>,
}

impl Packet for WorldData {
    const TAG: PacketTag = PacketTag::WorldData;

    fn verify(&self) -> Result<(), &'static str> {
        if self.tick_until < 0 {
            return Err("Negative horizon");
        }
        Ok(())
    }
}

/// One scheduled command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPacket {
    /// The command.
    pub command: CommandRecord,
}

impl Packet for CommandPacket {
    const TAG: PacketTag = PacketTag::Command;
}

/// Names of the connected participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerList {
    /// Participant names.
    pub players: Vec<String>,
}

impl Packet for PlayerList {
    const TAG: PacketTag = PacketTag::PlayerList;

    fn verify(&self) -> Result<(), &'static str> {
        if self.players.len() > MAX_PLAYERS {
            return Err("Too many players");
        }
        self.players
            .iter()
            .try_for_each(|name| check_text(name, MAX_NAME_LEN, "Player name too long"))
    }
}

/// Region document plus its pending commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionResponse {
    /// Pending region commands in issue order.
    pub commands: Vec<CommandRecord>,
    /// Region document bytes.
    pub region: Vec<u8>,
}

impl Packet for RegionResponse {
    const TAG: PacketTag = PacketTag::RegionResponse;
}

/// The authority released ticks below `tick_until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    /// New horizon.
    pub tick_until: i32,
}

impl Packet for TimeControl {
    const TAG: PacketTag = PacketTag::TimeControl;

    fn verify(&self) -> Result<(), &'static str> {
        if self.tick_until < 0 {
            return Err("Negative horizon");
        }
        Ok(())
    }
}

/// Text to show the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Message text.
    pub text: String,
}

impl Packet for Notification {
    const TAG: PacketTag = PacketTag::Notification;

    fn verify(&self) -> Result<(), &'static str> {
        check_text(&self.text, MAX_TEXT_LEN, "Notification too long")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_roundtrip_through_u8() {
        for tag in PacketTag::ALL {
            assert_eq!(PacketTag::try_from(tag as u8).unwrap(), tag);
        }
        assert!(PacketTag::try_from(6).is_err());
        assert!(PacketTag::try_from(200).is_err());
    }

    #[test]
    fn client_and_server_tags_are_split() {
        let client: Vec<_> = PacketTag::ALL
            .into_iter()
            .filter(|tag| tag.is_client_packet())
            .collect();
        assert_eq!(client.len(), 6);
        assert!(!PacketTag::TimeControl.is_client_packet());
    }

    #[test]
    fn limits_are_enforced() {
        assert!(Username { name: String::new() }.verify().is_err());
        assert!(Username {
            name: "x".repeat(MAX_NAME_LEN + 1)
        }
        .verify()
        .is_err());
        assert!(Username {
            name: "Alice".into()
        }
        .verify()
        .is_ok());
        assert!(TimeControl { tick_until: -1 }.verify().is_err());
        assert!(Notification {
            text: "x".repeat(MAX_TEXT_LEN + 1)
        }
        .verify()
        .is_err());
    }
}
