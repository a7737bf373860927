// SPDX-License-Identifier: GPL-3.0-only

//! Orchestrator state types

use super::compositor::{CompositeLayout, UiOverlay};
use super::observable::{ErrorSlot, Observable};
use super::task::TaskKind;
use super::zoom::ZoomState;
use std::fmt;

/// What the pipeline is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Idle,
    PreviewRunning,
    CapturingStill,
    Recording,
}

impl State {
    /// The state a running task of `kind` puts the orchestrator in
    pub fn for_task(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Preview => State::PreviewRunning,
            TaskKind::StillCapture => State::CapturingStill,
            TaskKind::Recording => State::Recording,
        }
    }
}

/// Which sink composited frames end up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    #[default]
    Picture,
    Video,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Picture => write!(f, "Picture"),
            CaptureMode::Video => write!(f, "Video"),
        }
    }
}

/// Every value the orchestrator publishes
///
/// Shared with running tasks so they can report without holding the
/// orchestrator itself.
#[derive(Default)]
pub struct Signals {
    pub state: Observable<State>,
    pub mode: Observable<CaptureMode>,
    pub recording: Observable<bool>,
    pub zoom: Observable<ZoomState>,
    pub layout: Observable<CompositeLayout>,
    pub ui_overlay: Observable<UiOverlay>,
    pub errors: ErrorSlot,
}

impl Signals {
    pub fn new(mode: CaptureMode, layout: CompositeLayout) -> Self {
        Self {
            mode: Observable::new(mode),
            layout: Observable::new(layout.clamped()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_for_task() {
        assert_eq!(State::for_task(TaskKind::Preview), State::PreviewRunning);
        assert_eq!(State::for_task(TaskKind::StillCapture), State::CapturingStill);
        assert_eq!(State::for_task(TaskKind::Recording), State::Recording);
    }

    #[test]
    fn test_signals_clamp_initial_layout() {
        let layout = CompositeLayout {
            overlay_scale: 7.0,
            ..CompositeLayout::default()
        };
        let signals = Signals::new(CaptureMode::Video, layout);
        assert_eq!(signals.mode.get(), CaptureMode::Video);
        assert_eq!(signals.layout.get().overlay_scale, 1.0);
        assert_eq!(signals.state.get(), State::Idle);
    }
}
