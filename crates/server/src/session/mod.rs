//! Per-connection session engine
//!
//! Four small collaborating pieces: a rolling id generator shared by header
//! ids and observer ids, a pending-correlation store for server-originated
//! requests awaiting their response, a per-session observation registry for
//! server-push subscriptions, and the state machine (`state`) that ties them
//! to a socket.

pub mod ids;
pub mod observation;
pub mod pending;
pub mod state;

pub use ids::RollingId;
pub use observation::{Observation, ObservationRegistry, TooManyObservers};
pub use pending::PendingStore;
pub use state::{Session, SessionDeps, create_observation, run};
