//! Wire protocol.
//!
//! Messages are `MessagePack` encoded with named fields and sent as frames
//! prefixed with a big-endian `u32` length. Entity ids on the wire are always
//! the authority's ids.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use voxelsync_engine::{Chunk, Target};
use voxelsync_foundation::{EntityId, Error, RegionPos, Result, Value, Vec3};
use voxelsync_storage::{EntityManager, EntityRecord};

use crate::mode::{Color, ServerInfo};

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// =============================================================================
// Messages
// =============================================================================

/// Sent by a client to the authority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake; must be the first message.
    Join {
        /// Display name.
        name: String,
        /// Display color.
        color: Color,
        /// Initial view distance in regions.
        view_distance: u32,
    },
    /// New view distance in regions.
    SetViewDistance(u32),
    /// Asks the authority to apply a mutation.
    RequestMutation {
        /// Client-chosen id echoed in the reply.
        request: u64,
        /// The mutation, in authority ids.
        mutation: Mutation,
    },
    /// A server event raised on the client.
    Event {
        /// Registered event name.
        name: String,
        /// Event data.
        payload: Value,
        /// Target, in authority ids.
        target: Target,
    },
    /// The client is leaving.
    Disconnect,
}

/// Sent by the authority to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake reply.
    Welcome {
        /// Id assigned to the client.
        client: u64,
        /// Server descriptor.
        info: ServerInfo,
        /// The client's player entity.
        player: EntityId,
    },
    /// A region became visible.
    RegionEntered {
        /// Region position.
        pos: RegionPos,
        /// Its chunk, if loaded.
        chunk: Option<Chunk>,
    },
    /// A region is no longer visible.
    RegionExited(RegionPos),
    /// An entity became visible. Carries replicated components only.
    EntityCreated(EntityRecord),
    /// A visible entity changed. Carries every replicated component.
    EntityUpdated(EntityRecord),
    /// An entity is gone or out of view.
    EntityRemoved(EntityId),
    /// A replicated event.
    Event {
        /// Registered event name.
        name: String,
        /// Event data.
        payload: Value,
        /// Target.
        target: Target,
    },
    /// A requested mutation was applied.
    MutationConfirmed {
        /// The request id.
        request: u64,
        /// Entity created by a spawn.
        spawned: Option<EntityId>,
    },
    /// A requested mutation was refused.
    MutationRejected {
        /// The request id.
        request: u64,
        /// Why.
        reason: String,
    },
    /// The server is closing the connection.
    Disconnect {
        /// Why.
        reason: String,
    },
}

// =============================================================================
// Mutations
// =============================================================================

/// A change to authoritative state, addressed by component name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Creates an entity.
    Spawn {
        /// Initial components.
        components: BTreeMap<String, Value>,
    },
    /// Attaches or replaces a component.
    Set {
        /// Target entity.
        entity: EntityId,
        /// Component name.
        component: String,
        /// New value.
        value: Value,
    },
    /// Removes a component.
    Remove {
        /// Target entity.
        entity: EntityId,
        /// Component name.
        component: String,
    },
    /// Destroys an entity.
    Destroy {
        /// Target entity.
        entity: EntityId,
    },
}

impl Mutation {
    /// Moves an entity to a new position.
    #[must_use]
    pub fn set_position(entity: EntityId, component: impl Into<String>, position: Vec3) -> Self {
        Self::Set {
            entity,
            component: component.into(),
            value: position.to_value(),
        }
    }

    /// The entity this mutation targets, if any.
    #[must_use]
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            Self::Spawn { .. } => None,
            Self::Set { entity, .. } | Self::Remove { entity, .. } | Self::Destroy { entity } => {
                Some(*entity)
            }
        }
    }

    /// Applies the mutation. Returns the spawned entity for [`Mutation::Spawn`].
    ///
    /// # Errors
    ///
    /// Returns `UnknownComponent` for unregistered names, or the store's
    /// error for stale handles. Nothing is applied on error.
    pub fn apply(&self, store: &mut EntityManager) -> Result<Option<EntityId>> {
        match self {
            Self::Spawn { components } => {
                let library = store.library().clone();
                let resolved = components
                    .iter()
                    .map(|(name, value)| Ok((library.resolve(name)?, value.clone())))
                    .collect::<Result<Vec<_>>>()?;
                store.create_with(resolved).map(Some)
            }
            Self::Set {
                entity,
                component,
                value,
            } => {
                let kind = store.library().resolve(component)?;
                store.attach(*entity, kind, value.clone())?;
                Ok(None)
            }
            Self::Remove { entity, component } => {
                let kind = store.library().resolve(component)?;
                store.remove(*entity, kind)?;
                Ok(None)
            }
            Self::Destroy { entity } => {
                store.destroy(*entity)?;
                Ok(None)
            }
        }
    }

    /// Rewrites every entity id, including references inside values.
    #[must_use]
    pub fn remap(&self, f: &mut impl FnMut(EntityId) -> EntityId) -> Self {
        match self {
            Self::Spawn { components } => Self::Spawn {
                components: components
                    .iter()
                    .map(|(name, value)| (name.clone(), value.remap_entities(f)))
                    .collect(),
            },
            Self::Set {
                entity,
                component,
                value,
            } => Self::Set {
                entity: f(*entity),
                component: component.clone(),
                value: value.remap_entities(f),
            },
            Self::Remove { entity, component } => Self::Remove {
                entity: f(*entity),
                component: component.clone(),
            },
            Self::Destroy { entity } => Self::Destroy { entity: f(*entity) },
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Encodes a message.
///
/// # Errors
///
/// Returns `Serialization` if encoding fails.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(message).map_err(Error::serialization)
}

/// Decodes a message.
///
/// # Errors
///
/// Returns `Serialization` if the bytes are not a valid message.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(Error::serialization)
}

/// Writes one length-prefixed frame.
///
/// # Errors
///
/// Returns an I/O error, or `InvalidInput` if the payload is too large.
pub fn write_frame(writer: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds {MAX_FRAME_LEN}", payload.len()),
        ));
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Reads one length-prefixed frame. Returns `Ok(None)` on a clean end of stream.
///
/// # Errors
///
/// Returns an I/O error, or `InvalidData` if the announced length is too large.
pub fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds {MAX_FRAME_LEN}"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}
