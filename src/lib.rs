pub mod attendance;
pub mod codec;
pub mod config;
pub mod election;
pub mod error;
pub mod node;
pub mod notes;
pub mod transport;
