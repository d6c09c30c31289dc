//! Resumable store discovery over a coordinate grid.
//!
//! A scan walks its [`Grid`] in row-major order, one lookup at a time, and
//! checkpoints the last processed coordinate so an interrupted scan picks up
//! right after it. The first point of a fresh scan is the region's minimum
//! corner.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    checkpoint::CheckpointStore,
    coordinate::Coordinate,
    grid::{Grid, GridError},
    progress::ProgressReporter,
    stores::{DiscoveredStore, StoreSet},
};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("lookup failed at {at}")]
    Lookup {
        at: Coordinate,
        #[source]
        source: anyhow::Error,
    },
    #[error("checkpoints rounded to {unit} can't resume a grid stepping {step}")]
    CoarseCheckpoint { unit: f64, step: f64 },
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Finds the stores near one coordinate.
pub trait StoreLookup {
    type Store: DiscoveredStore;

    fn lookup(&mut self, at: Coordinate) -> anyhow::Result<Vec<Self::Store>>;
}

impl<F, S> StoreLookup for F
where
    F: FnMut(Coordinate) -> anyhow::Result<Vec<S>>,
    S: DiscoveredStore,
{
    type Store = S;

    fn lookup(&mut self, at: Coordinate) -> anyhow::Result<Vec<S>> {
        self(at)
    }
}

/// What to do when a lookup fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Log it, count the coordinate as having no stores and carry on.
    #[default]
    Skip,
    /// Stop the scan. The checkpoint stays on the last good coordinate so a
    /// rerun starts with the failed one.
    Abort,
}

#[derive(Clone, Debug)]
pub struct ScanJob {
    pub name: String,
    pub grid: Grid,
    /// Processed coordinates between checkpoint saves.
    pub checkpoint_every: usize,
    pub on_failure: FailurePolicy,
    /// Delete the checkpoint once the last point is processed instead of
    /// leaving it on that point.
    pub clear_on_finish: bool,
}

impl ScanJob {
    pub fn new(name: impl Into<String>, grid: Grid) -> Self {
        Self {
            name: name.into(),
            grid,
            checkpoint_every: 1,
            on_failure: FailurePolicy::Skip,
            clear_on_finish: false,
        }
    }
}

/// Progress of a running scan.
#[derive(Clone, Debug)]
pub struct ScanState {
    pub at: Coordinate,
    /// Points before the resume point, processed by earlier runs.
    pub skipped: usize,
    pub visited: usize,
    pub remaining: usize,
    pub found: usize,
}

impl ScanState {
    pub fn position(&self) -> usize {
        self.skipped + self.visited
    }

    pub fn total(&self) -> usize {
        self.skipped + self.visited + self.remaining
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanOutcome {
    /// Checkpoint the scan resumed after, if any.
    pub resumed_from: Option<Coordinate>,
    pub visited: usize,
    /// Lookups that failed and were skipped.
    pub failed: usize,
    pub last_visited: Option<Coordinate>,
    /// Last checkpoint that was actually written.
    pub checkpoint: Option<Coordinate>,
    pub checkpoint_failures: usize,
}

pub struct GridScanner<R> {
    job: ScanJob,
    checkpoints: CheckpointStore,
    reporter: R,
    report_failed: bool,
}

impl<R: ProgressReporter> GridScanner<R> {
    pub fn new(job: ScanJob, checkpoints: CheckpointStore, reporter: R) -> Result<Self, ScanError> {
        // a rounded checkpoint has to land closer to its own point than to
        // either neighbour
        if let Some(unit) = checkpoints.precision().unit() {
            let step = job.grid.step().lat.min(job.grid.step().lon);
            if step <= unit {
                return Err(ScanError::CoarseCheckpoint { unit, step });
            }
        }

        Ok(Self {
            job,
            checkpoints,
            reporter,
            report_failed: false,
        })
    }

    pub fn job(&self) -> &ScanJob {
        &self.job
    }

    /// Index of the next point to process, and the checkpoint it follows.
    pub fn resume_point(&self) -> (usize, Option<Coordinate>) {
        match self.checkpoints.load(&self.job.name) {
            Some(at) => {
                let slack = self.checkpoints.precision().slack();
                (self.job.grid.resume_after(at, slack), Some(at))
            }
            None => (0, None),
        }
    }

    /// Scans from the resume point to the end of the grid, merging every
    /// store found into `found`.
    pub fn run<L: StoreLookup>(
        &mut self,
        lookup: &mut L,
        found: &mut StoreSet<L::Store>,
    ) -> Result<ScanOutcome, ScanError> {
        let (start, resumed_from) = self.resume_point();
        let mut outcome = ScanOutcome {
            resumed_from,
            checkpoint: resumed_from,
            ..Default::default()
        };
        let total = self.job.grid.len();

        match resumed_from {
            Some(at) => info!(
                job = %self.job.name,
                checkpoint = %at,
                remaining = total - start,
                "resuming scan"
            ),
            None => info!(job = %self.job.name, points = total, "starting scan"),
        }

        let every = self.job.checkpoint_every.max(1);
        let mut unsaved = 0;

        for (index, at) in self.job.grid.clone().iter_from(start).enumerate() {
            match lookup.lookup(at) {
                Ok(stores) => {
                    let added = found.merge(stores);
                    if added > 0 {
                        debug!(job = %self.job.name, %at, added, "found stores");
                    }
                }
                Err(source) => match self.job.on_failure {
                    FailurePolicy::Skip => {
                        warn!(
                            job = %self.job.name,
                            %at,
                            error = format!("{source:#}"),
                            "lookup failed, skipping"
                        );
                        outcome.failed += 1;
                    }
                    FailurePolicy::Abort => {
                        if unsaved > 0 {
                            if let Some(last) = outcome.last_visited {
                                self.save(last, &mut outcome);
                            }
                        }
                        self.reporter.finish();
                        return Err(ScanError::Lookup { at, source });
                    }
                },
            }

            outcome.visited += 1;
            outcome.last_visited = Some(at);
            unsaved += 1;

            let state = ScanState {
                at,
                skipped: start,
                visited: index + 1,
                remaining: total - start - index - 1,
                found: found.len(),
            };
            self.report(&state);

            if unsaved >= every || state.remaining == 0 {
                self.save(at, &mut outcome);
                unsaved = 0;
            }
        }

        self.reporter.finish();

        if self.job.clear_on_finish {
            match self.checkpoints.clear(&self.job.name) {
                Ok(()) => outcome.checkpoint = None,
                Err(e) => {
                    error!(
                        job = %self.job.name,
                        error = format!("{e:#}"),
                        "failed to clear checkpoint"
                    );
                }
            }
        }

        info!(
            job = %self.job.name,
            visited = outcome.visited,
            failed = outcome.failed,
            stores = found.len(),
            "scan finished"
        );
        Ok(outcome)
    }

    fn save(&mut self, at: Coordinate, outcome: &mut ScanOutcome) {
        match self.checkpoints.save(&self.job.name, at) {
            Ok(saved) => outcome.checkpoint = Some(saved),
            Err(e) => {
                // keep scanning, but resuming will repeat everything since
                // the last good checkpoint
                error!(
                    job = %self.job.name,
                    %at,
                    error = format!("{e:#}"),
                    "failed to save checkpoint"
                );
                outcome.checkpoint_failures += 1;
            }
        }
    }

    fn report(&mut self, state: &ScanState) {
        if let Err(e) = self.reporter.report(state) {
            if self.report_failed {
                debug!(error = format!("{e:#}"), "progress report failed");
            } else {
                warn!(error = format!("{e:#}"), "progress report failed");
                self.report_failed = true;
            }
        }
    }
}
