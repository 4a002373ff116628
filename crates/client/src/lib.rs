//! Reference device-side session client (C11)
//!
//! A minimal TCP client speaking the hub's wire protocol from the device
//! side: verify, ping, answer constrained requests and observation
//! establishes, and originate a constrained POST or observation
//! notification. Used by this workspace's integration tests to exercise the
//! hub end to end over a real loopback connection; it has no front-adapter
//! surface of its own and is not a production deliverable.

mod connection;
mod ids;

pub use connection::{DeviceClient, REQUEST_TIMEOUT};
