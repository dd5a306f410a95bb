// Cache façade and its two backends
pub mod cache;

// Post-mutation invalidation + event fan-out
pub mod coordinator;

// Live sessions, rooms and the WebSocket gateway
pub mod realtime;

pub mod security;
pub mod server;
pub mod services;

pub use services::Services;
