#![forbid(unsafe_code)]

use crate::vcs::VcsError;
use ho_core::ids::WorkUnitId;
use ho_core::model::Signal;
use ho_storage::StoreError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Vcs(#[from] VcsError),
    #[error("non matching work units: waiting for {expected}, but {signal} holds {observed}")]
    ProtocolViolation {
        signal: Signal,
        expected: WorkUnitId,
        observed: WorkUnitId,
    },
    #[error("inconsistent checkout: {expected} was offered but {checked_out} is checked out")]
    CheckoutMismatch {
        expected: WorkUnitId,
        checked_out: WorkUnitId,
    },
    #[error(
        "no result for {id} after {}s; check that a tester is polling the same store, \
         inspect the signals with `ho_runner state`, then rerun the bot (it clears stale \
         signals on start)",
        waited.as_secs()
    )]
    Timeout { id: WorkUnitId, waited: Duration },
    #[error("{id} finished but no overall status was archived")]
    StatusMissing { id: WorkUnitId },
    #[error("OFFERED still present after clearing stale signals")]
    OfferedNotCleared,
}
