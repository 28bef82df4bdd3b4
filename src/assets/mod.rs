//! Concrete assets shipped with the crate.

pub mod network;

pub use network::{NetworkHosts, StaticNetworkConfig};
