//! Authority mode and the descriptors exchanged on connect.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Network role of this process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkMode {
    /// Standalone, no network activity.
    #[default]
    None,
    /// Connected to a remote authority.
    Client,
    /// Hosting remote clients.
    Server,
}

impl NetworkMode {
    /// Returns true if this process may originate binding mutations.
    #[must_use]
    pub const fn is_authority(self) -> bool {
        matches!(self, Self::None | Self::Server)
    }

    /// Returns true if remote clients may be connected.
    #[must_use]
    pub const fn has_remote_clients(self) -> bool {
        matches!(self, Self::Server)
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

/// The remote authority, as seen by a client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Message of the day, shown once on connect. May be empty.
    pub motd: String,
    /// Title of the world being played.
    pub world_title: String,
}

/// Display color of a participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
}

impl Color {
    /// White.
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    /// Creates a color.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}
