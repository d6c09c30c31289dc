use std::io::Write;

use anyhow::Result;
use indicatif::ProgressBar;
use tracing::info;

use crate::{scanner::ScanState, utils::progress_bar};

/// Receives scan progress after every processed coordinate.
///
/// Errors are logged by the scanner and otherwise ignored.
pub trait ProgressReporter {
    fn report(&mut self, state: &ScanState) -> Result<()>;

    fn finish(&mut self) {}
}

impl<R: ProgressReporter + ?Sized> ProgressReporter for Box<R> {
    fn report(&mut self, state: &ScanState) -> Result<()> {
        (**self).report(state)
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}

pub struct Silent;

impl ProgressReporter for Silent {
    fn report(&mut self, _: &ScanState) -> Result<()> {
        Ok(())
    }
}

/// Progress bar on stderr.
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    pub fn new(total: usize) -> Self {
        Self {
            bar: progress_bar(total as u64),
        }
    }
}

impl ProgressReporter for BarReporter {
    fn report(&mut self, state: &ScanState) -> Result<()> {
        if self.bar.length() != Some(state.total() as u64) {
            self.bar.set_length(state.total() as u64);
        }
        self.bar.set_position(state.position() as u64);
        self.bar.set_message(format!("{} - {} stores", state.at, state.found));
        Ok(())
    }

    fn finish(&mut self) {
        self.bar.finish();
    }
}

/// Status line rewritten in place on any writer.
pub struct LineReporter<W> {
    out: W,
}

impl<W: Write> LineReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ProgressReporter for LineReporter<W> {
    fn report(&mut self, state: &ScanState) -> Result<()> {
        write!(
            self.out,
            "\r{} ({}/{}) {} stores",
            state.at,
            state.position(),
            state.total(),
            state.found
        )?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) {
        // best effort
        let _ = writeln!(self.out);
    }
}

/// Progress as log events, for runs without a terminal.
pub struct LogReporter {
    every: usize,
}

impl LogReporter {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl ProgressReporter for LogReporter {
    fn report(&mut self, state: &ScanState) -> Result<()> {
        if state.visited % self.every == 0 || state.remaining == 0 {
            info!(
                lat = state.at.lat(),
                lon = state.at.lon(),
                visited = state.visited,
                remaining = state.remaining,
                found = state.found,
                "scan progress"
            );
        }
        Ok(())
    }
}
