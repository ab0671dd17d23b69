use std::{
    fmt,
    time::{Duration, Instant},
};

use serde::Serialize;
use tracing::*;

use crate::{error::ScreenParseError, layout::result::StageTimings};

/// Orchestrator stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    DetectText,
    DetectIcons,
    Reconcile,
    Fuse,
    Caption,
    Annotate,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// The stage following `self` on a successful run.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Start => Some(Stage::DetectText),
            Stage::DetectText => Some(Stage::DetectIcons),
            Stage::DetectIcons => Some(Stage::Reconcile),
            Stage::Reconcile => Some(Stage::Fuse),
            Stage::Fuse => Some(Stage::Caption),
            Stage::Caption => Some(Stage::Annotate),
            Stage::Annotate => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }

    /// Forward moves only; any live stage may fail.
    pub fn can_advance_to(self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Stage::Failed || self.next() == Some(next)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::DetectText => "detect_text",
            Stage::DetectIcons => "detect_icons",
            Stage::Reconcile => "reconcile",
            Stage::Fuse => "fuse",
            Stage::Caption => "caption",
            Stage::Annotate => "annotate",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress of one analysis run.
#[derive(Debug)]
pub struct RunState {
    stage: Stage,
    started: Instant,
    timings: StageTimings,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            stage: Stage::Start,
            started: Instant::now(),
            timings: StageTimings::default(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal stage transition {} -> {}",
            self.stage,
            next
        );
        trace!("stage {} -> {}", self.stage, next);
        self.stage = next;
    }

    /// Stores the wall-clock time of `stage`.
    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        let slot = match stage {
            Stage::DetectText => &mut self.timings.detect_text,
            Stage::DetectIcons => &mut self.timings.detect_icons,
            Stage::Reconcile => &mut self.timings.reconcile,
            Stage::Fuse => &mut self.timings.fuse,
            Stage::Caption => &mut self.timings.caption,
            Stage::Annotate => &mut self.timings.annotate,
            Stage::Start | Stage::Done | Stage::Failed => return,
        };
        *slot = elapsed;
    }

    pub fn fail(&mut self, err: &ScreenParseError) {
        error!(
            "analysis failed at stage {} after {:?}: {}",
            self.stage,
            self.started.elapsed(),
            err
        );
        self.advance(Stage::Failed);
    }

    /// Moves to `Done` and returns the timings with the total filled in.
    pub fn finish(&mut self) -> StageTimings {
        self.advance(Stage::Done);
        self.timings.total = self.started.elapsed();
        self.timings
    }
}
