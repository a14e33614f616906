#![forbid(unsafe_code)]

use super::HandoffError;
use crate::exec::CommandRunner;
use crate::plan::CommandPlan;
use crate::sequence::{ArchiveSink, RunSequencer};
use crate::supervisor::ReloadCheck;
use crate::vcs::Vcs;
use ho_core::ids::WorkUnitId;
use ho_core::model::{OverallStatus, Signal};
use ho_storage::{Archive, BlobStore, SignalBoard, StoreError};
use std::thread::sleep;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartMode {
    /// First start: every signal present is left over from a crashed run.
    Fresh,
    /// Relaunched by a reload: OFFERED may still be ours to take.
    Reloaded,
}

#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub poll_interval: Duration,
    pub start: StartMode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    /// The program changed on disk; OFFERED (if any) was left in place for the next process.
    Reload,
    /// Not checkoutable; reported as passing without running anything.
    Skipped(WorkUnitId),
    Completed {
        id: WorkUnitId,
        status: OverallStatus,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerExit {
    Reload,
    Stopped,
}

/// The unit of work being processed in one iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkContext {
    pub id: WorkUnitId,
    pub checked_out: WorkUnitId,
}

/// The tester side: waits for offers, runs the plan against them and reports back.
pub struct Consumer<'a> {
    store: &'a dyn BlobStore,
    vcs: &'a mut dyn Vcs,
    reload: &'a mut dyn ReloadCheck,
    runner: &'a CommandRunner,
    plan: &'a CommandPlan,
    config: ConsumerConfig,
}

impl<'a> Consumer<'a> {
    pub fn new(
        store: &'a dyn BlobStore,
        vcs: &'a mut dyn Vcs,
        reload: &'a mut dyn ReloadCheck,
        runner: &'a CommandRunner,
        plan: &'a CommandPlan,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            store,
            vcs,
            reload,
            runner,
            plan,
            config,
        }
    }

    /// Startup corruption check. Skipped after a reload so a kept OFFERED survives.
    pub fn recover(&mut self) -> Result<Vec<Signal>, HandoffError> {
        let board = SignalBoard::new(self.store);
        match self.config.start {
            StartMode::Fresh => {
                board.log_state();
                Ok(board.clear_stale()?)
            }
            StartMode::Reloaded => {
                info!("resuming after reload, keeping signals");
                Ok(Vec::new())
            }
        }
    }

    pub fn poll_once(&mut self) -> Result<PollOutcome, HandoffError> {
        if self.reload.reload_requested() {
            return Ok(PollOutcome::Reload);
        }
        let board = SignalBoard::new(self.store);
        board.log_state();

        let offered = match board.read(Signal::Offered) {
            Ok(Some(id)) => id,
            Ok(None) => return Ok(PollOutcome::Idle),
            Err(err @ (StoreError::NotUtf8 { .. } | StoreError::InvalidPayload { .. })) => {
                warn!(error = %err, "unreadable offer, clearing signals");
                board.clear_stale()?;
                return Ok(PollOutcome::Idle);
            }
            Err(err) => return Err(err.into()),
        };

        let Some(checked_out) = self.vcs.sync_to(&offered)? else {
            warn!(work_unit = %offered, "cannot check out, reporting success without running");
            Archive::new(self.store).write_status(&offered, OverallStatus::Passed)?;
            board.put(Signal::Finished, &offered)?;
            board.delete(Signal::Offered)?;
            return Ok(PollOutcome::Skipped(offered));
        };

        // The checkout may have brought a new version of us; OFFERED is still up, so the
        // relaunched process picks up the same work unit.
        if self.reload.reload_requested() {
            return Ok(PollOutcome::Reload);
        }
        if checked_out != offered {
            return Err(HandoffError::CheckoutMismatch {
                expected: offered,
                checked_out,
            });
        }

        let ctx = WorkContext {
            id: offered,
            checked_out,
        };
        board.put(Signal::Claimed, &ctx.id)?;
        board.delete(Signal::Offered)?;
        info!(work_unit = %ctx.id, head = %ctx.checked_out, "running with work unit");

        let status = self.execute(&ctx);
        info!(work_unit = %ctx.id, status = status.as_str(), "running finished");
        Archive::new(self.store).write_status(&ctx.id, status)?;
        board.put(Signal::Finished, &ctx.id)?;
        board.delete(Signal::Claimed)?;
        Ok(PollOutcome::Completed { id: ctx.id, status })
    }

    fn execute(&self, ctx: &WorkContext) -> OverallStatus {
        let sequencer = RunSequencer::new(self.runner)
            .with_cleanup(self.plan.cleanup.as_ref(), self.plan.cleanup_timeout());
        let mut sink = ArchiveSink::new(Archive::new(self.store), &ctx.id);
        let outcome = sequencer.run_all(&self.plan.commands, &mut sink);
        if sink.errors() > 0 {
            warn!(
                work_unit = %ctx.id,
                errors = sink.errors(),
                "some failure logs were not archived"
            );
        }
        if outcome.ran == 0 {
            warn!(work_unit = %ctx.id, "no commands ran; reporting success");
        }
        OverallStatus::from_failed(outcome.failed())
    }

    /// Polls until a reload is requested, or for a single iteration when `once`.
    pub fn run(&mut self, once: bool) -> Result<ConsumerExit, HandoffError> {
        self.recover()?;
        loop {
            match self.poll_once()? {
                PollOutcome::Reload => return Ok(ConsumerExit::Reload),
                PollOutcome::Skipped(_) if !once => continue,
                _ => {}
            }
            if once {
                return Ok(ConsumerExit::Stopped);
            }
            sleep(self.config.poll_interval);
        }
    }
}
