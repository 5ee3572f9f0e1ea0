//! Error types for voxelsync.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::entity::{ClientId, EntityId};

/// The main error type for voxelsync operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates a stale entity reference error.
    #[must_use]
    pub fn stale_entity(id: EntityId) -> Self {
        Self::new(ErrorKind::StaleEntity(id))
    }

    /// Creates an entity not found error.
    #[must_use]
    pub fn entity_not_found(id: EntityId) -> Self {
        Self::new(ErrorKind::EntityNotFound(id))
    }

    /// Creates a component not found error.
    #[must_use]
    pub fn component_not_found(entity: EntityId, component: impl Into<String>) -> Self {
        Self::new(ErrorKind::ComponentNotFound {
            entity,
            component: component.into(),
        })
    }

    /// Creates an unknown component kind error.
    #[must_use]
    pub fn unknown_component(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownComponent(name.into()))
    }

    /// Creates an unknown event kind error.
    #[must_use]
    pub fn unknown_event(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownEvent(name.into()))
    }

    /// Creates a duplicate registration error.
    #[must_use]
    pub fn duplicate_kind(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateKind(name.into()))
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Serialization(message.to_string()))
    }

    /// Creates an I/O error.
    #[must_use]
    pub fn io(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Io(message.to_string()))
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Network(message.to_string()))
    }

    /// Creates a disconnected-client error.
    #[must_use]
    pub fn disconnected(client: ClientId) -> Self {
        Self::new(ErrorKind::Disconnected(client.raw()))
    }

    /// Creates a wrong-mode error.
    #[must_use]
    pub fn wrong_mode(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(ErrorKind::WrongMode {
            expected: expected.into(),
            actual: actual.into(),
        })
    }

    /// Creates an invalid state transition error.
    #[must_use]
    pub fn invalid_transition(from: impl fmt::Debug, to: impl fmt::Debug) -> Self {
        Self::new(ErrorKind::InvalidTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }

    /// Creates a module resolution error.
    #[must_use]
    pub fn module_resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModuleResolution(message.into()))
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Config(message.to_string()))
    }

    /// Creates a limit exceeded error.
    #[must_use]
    pub fn limit_exceeded(limit: Limit) -> Self {
        Self::new(ErrorKind::LimitExceeded(limit))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Returns true for stale or unknown entity handles.
    #[must_use]
    pub fn is_dangling_entity(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::StaleEntity(_) | ErrorKind::EntityNotFound(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io(err)
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Entity handle refers to a destroyed or reused slot.
    #[error("stale entity reference: {0:?}")]
    StaleEntity(EntityId),

    /// Entity was never issued by this store.
    #[error("entity not found: {0:?}")]
    EntityNotFound(EntityId),

    /// Component not attached to entity.
    #[error("component not found: {component} on entity {entity:?}")]
    ComponentNotFound {
        /// The entity that was queried.
        entity: EntityId,
        /// The component name that was not found.
        component: String,
    },

    /// Component kind not registered in the active library.
    #[error("unknown component kind: {0}")]
    UnknownComponent(String),

    /// Event kind not registered in the active library.
    #[error("unknown event kind: {0}")]
    UnknownEvent(String),

    /// A kind with this name is already registered.
    #[error("kind already registered: {0}")]
    DuplicateKind(String),

    /// Encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(String),

    /// Transport error.
    #[error("network error: {0}")]
    Network(String),

    /// The client's connection is closed.
    #[error("client {0} is disconnected")]
    Disconnected(u64),

    /// Operation requires authority.
    #[error("operation requires an authoritative process")]
    NotAuthority,

    /// Operation is not valid in the current network mode.
    #[error("wrong network mode: expected {expected}, got {actual}")]
    WrongMode {
        /// Mode the operation requires.
        expected: String,
        /// Mode the process is in.
        actual: String,
    },

    /// State machine transition is not allowed.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// Content set could not be resolved.
    #[error("module resolution failed: {0}")]
    ModuleResolution(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Limit exceeded (kill switch triggered).
    #[error("limit exceeded: {0}")]
    LimitExceeded(Limit),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Limits (kill switches) that can be exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Limit {
    /// Event dispatch did not settle within the allowed passes.
    MaxDispatchPasses {
        /// The configured limit.
        limit: u32,
        /// Events still queued when dispatch gave up.
        pending: usize,
    },
    /// Too many inbound messages for one tick.
    MaxInboundMessages {
        /// The configured limit.
        limit: usize,
    },
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxDispatchPasses { limit, pending } => {
                write!(f, "max dispatch passes ({limit}) exceeded, {pending} events pending")
            }
            Self::MaxInboundMessages { limit } => {
                write!(f, "max inbound messages per tick ({limit}) exceeded")
            }
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Subsystem or file that raised the error.
    pub source: Option<String>,
    /// Chain of operations leading to the error, outermost last.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "at {source}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}

/// Result type alias using the voxelsync error.
pub type Result<T> = std::result::Result<T, Error>;
