#![forbid(unsafe_code)]

use super::HandoffError;
use ho_core::ids::WorkUnitId;
use ho_core::model::{OverallStatus, Signal};
use ho_storage::{Archive, BlobStore, SignalBoard};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub poll_interval: Duration,
    /// Overall wait for FINISHED, counted from the moment OFFERED is written.
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducerReport {
    pub id: WorkUnitId,
    pub status: OverallStatus,
    pub elapsed: Duration,
}

/// The bot side: offers one work unit and blocks until the tester reports on it.
pub struct Producer<'a> {
    store: &'a dyn BlobStore,
    config: ProducerConfig,
}

impl<'a> Producer<'a> {
    pub fn new(store: &'a dyn BlobStore, config: ProducerConfig) -> Self {
        Self { store, config }
    }

    pub fn offer_and_wait(&self, id: &WorkUnitId) -> Result<ProducerReport, HandoffError> {
        let board = SignalBoard::new(self.store);
        board.log_state();
        // Anything present now belongs to a broken or stopped run.
        if !board.clear_stale()?.is_empty() {
            board.log_state();
        }
        if board.exists(Signal::Offered)? {
            return Err(HandoffError::OfferedNotCleared);
        }
        board.put(Signal::Offered, id)?;
        info!(work_unit = %id, timeout_s = self.config.timeout.as_secs(), "offered for testing");

        let begin = Instant::now();
        loop {
            if begin.elapsed() > self.config.timeout {
                return Err(HandoffError::Timeout {
                    id: id.clone(),
                    waited: begin.elapsed(),
                });
            }
            if let Some(finished) = board.read(Signal::Finished)? {
                if &finished != id {
                    return Err(HandoffError::ProtocolViolation {
                        signal: Signal::Finished,
                        expected: id.clone(),
                        observed: finished,
                    });
                }
                break;
            }
            info!(work_unit = %id, "still waiting for test result");
            board.log_state();
            sleep(self.config.poll_interval);
        }

        let elapsed = begin.elapsed();
        info!(work_unit = %id, elapsed_s = elapsed.as_secs(), "done running test");
        let status = Archive::new(self.store).read_status(id)?;
        board.delete(Signal::Finished)?;
        let status = status.ok_or_else(|| HandoffError::StatusMissing { id: id.clone() })?;
        info!(work_unit = %id, status = status.as_str(), "test status");
        Ok(ProducerReport {
            id: id.clone(),
            status,
            elapsed,
        })
    }
}
