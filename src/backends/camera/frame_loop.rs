// SPDX-License-Identifier: GPL-3.0-only
//! Dedicated capture threads for device backends
//!
//! Each streaming device owns one of these; its callbacks (frame delivery,
//! disconnect detection) run on that thread and never on the async runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by the loop body to control the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Controller for a capture loop running in a named thread
///
/// ```ignore
/// let controller = CaptureLoopController::start_with_init(
///     "v4l2:/dev/video0",
///     || open_stream(),
///     move |stream| deliver_next_frame(stream),
/// )?;
/// controller.stop();
/// ```
pub struct CaptureLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Start a capture loop whose state is built on the capture thread
    ///
    /// If `init_fn` fails, `on_init_error` runs on the capture thread and the
    /// loop body never does.
    pub fn start_with_init<S, I, F, E>(
        name: &str,
        init_fn: I,
        mut loop_fn: F,
        on_init_error: E,
    ) -> std::io::Result<Self>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
        E: FnOnce(String) + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(format!("capture-{}", name))
            .spawn(move || {
                let mut state = match init_fn() {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(name = %name_clone, error = %e, "Capture loop initialization failed");
                        on_init_error(e);
                        return;
                    }
                };

                while !stop_signal_clone.load(Ordering::SeqCst) {
                    if loop_fn(&mut state) == LoopAction::Stop {
                        debug!(name = %name_clone, "Loop requested stop");
                        break;
                    }
                }

                info!(name = %name_clone, "Capture loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Stopped from its own body; the loop exits on its next check
                return;
            }
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "Capture loop dropped, stopping");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_loop_runs_until_stop_requested() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start_with_init(
            "test-loop",
            || Ok(()),
            move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                LoopAction::Continue
            },
            |_| {},
        )
        .unwrap();

        thread::sleep(Duration::from_millis(40));
        assert!(controller.is_running());
        controller.stop();
        assert!(counter.load(Ordering::SeqCst) > 0);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_loop_state_comes_from_init() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);

        let mut controller = CaptureLoopController::start_with_init(
            "test-init-loop",
            || Ok(42u32),
            move |state| {
                seen_clone.store(*state, Ordering::SeqCst);
                LoopAction::Stop
            },
            |_| {},
        )
        .unwrap();

        controller.stop();
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_init_failure_skips_body() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let reported = Arc::new(AtomicBool::new(false));
        let reported_clone = Arc::clone(&reported);

        let mut controller = CaptureLoopController::start_with_init(
            "test-fail-init",
            || Err::<(), _>("no such device".to_string()),
            move |_: &mut ()| {
                ran_clone.store(true, Ordering::SeqCst);
                LoopAction::Stop
            },
            move |_| reported_clone.store(true, Ordering::SeqCst),
        )
        .unwrap();

        controller.stop();
        assert!(!ran.load(Ordering::SeqCst));
        assert!(reported.load(Ordering::SeqCst));
    }
}
