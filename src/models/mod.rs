//! Domain models shared by the upstream, tuner and web layers

pub mod channel;

pub use channel::{Channel, ChannelRegistry};
