//! cynocore
//!
//! The cyno assignment engine: a pure computation over a roster snapshot, a
//! list of target requests, and a distance oracle. Holds no state between
//! passes and does no IO of its own; the routing service and the roster source
//! come in through the `DistanceOracle` / `RosterProvider` traits so tests can
//! substitute fakes.

pub mod engine;
pub mod oracle;
pub mod types;

pub use engine::{ValidationError, compute_assignments, run_search};
pub use oracle::{DistanceOracle, RosterProvider};
pub use types::{
    AssignedCyno, AvailableCyno, Candidate, CharacterId, ClaimedBy, ColorCode, Jumps, SystemId,
    TargetAssignments, TargetRequest,
};
