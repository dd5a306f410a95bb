//! Room-scoped live event delivery
//!
//! Sessions authenticate at the WebSocket handshake, land in the registry
//! joined to their own `user:{id}` room, and receive typed domain events
//! through a per-session queue.

pub mod auth;
mod broadcaster;
pub mod events;
mod gateway;
mod registry;

pub use auth::{AuthConfig, AuthError, Authenticator, Identity, StaticTokenAuthenticator};
pub use broadcaster::{EventBroadcaster, EventTarget};
pub use events::{ClientMessage, ControlMessage, DomainEvent, RoomId, RoomKind, ServerMessage};
pub use gateway::{handle_frame, RealtimeGateway};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionSession, SessionSender};
