use std::future::Future;

use crate::types::{Candidate, SystemId};

/// Jump-count routing service between two systems.
///
/// `Ok(None)` means no route exists; `Err` is a transient failure. The engine
/// folds both into `Jumps::Unreachable` for that one pair, so an oracle error
/// never fails a whole pass. Implementations should bound each call with a
/// timeout; the engine imposes none of its own.
pub trait DistanceOracle: Sync {
    fn jumps(
        &self,
        origin: SystemId,
        dest: SystemId,
    ) -> impl Future<Output = anyhow::Result<Option<u32>>> + Send;
}

/// Source of the current candidate roster.
pub trait RosterProvider: Sync {
    fn roster(&self) -> impl Future<Output = anyhow::Result<Vec<Candidate>>> + Send;
}
