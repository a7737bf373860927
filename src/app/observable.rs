// SPDX-License-Identifier: GPL-3.0-only

//! Latest-value-wins observable state

use crate::errors::ErrorEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::error;

/// Single-slot broadcast value; subscribers see only changes
///
/// Subscribing returns a `watch::Receiver`; dropping it unsubscribes.
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Observable<T> {
    pub fn new(value: T) -> Self {
        let (tx, _) = watch::channel(value);
        Self { tx }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Store `value`, notifying subscribers only if it differs
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Edit in place; subscribers are notified when the value changed
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        self.tx.send_if_modified(|current| {
            let before = current.clone();
            f(current);
            *current != before
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone + PartialEq + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// The latest unacknowledged error
#[derive(Default)]
pub struct ErrorSlot {
    current: Observable<Option<ErrorEvent>>,
    emitted: AtomicU64,
}

impl ErrorSlot {
    pub fn emit(&self, event: ErrorEvent, detail: &str) {
        error!(?event, detail, "Error surfaced");
        self.emitted.fetch_add(1, Ordering::SeqCst);
        // Always notify, a repeat of the same error is still a new event
        self.current.tx.send_modify(|current| *current = Some(event));
    }

    pub fn dismiss(&self) {
        self.current.set(None);
    }

    pub fn current(&self) -> Option<ErrorEvent> {
        self.current.get()
    }

    /// Total events emitted, acknowledged or not
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ErrorEvent>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_deduplicates() {
        let value = Observable::new(1u32);
        let mut rx = value.subscribe();
        assert!(!value.set(1));
        assert!(!rx.has_changed().unwrap());
        assert!(value.set(2));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 2);
    }

    #[test]
    fn test_update_reports_change() {
        let value = Observable::new((1u32, 2u32));
        assert!(!value.update(|v| v.0 = 1));
        assert!(value.update(|v| v.1 = 3));
        assert_eq!(value.get(), (1, 3));
    }

    #[test]
    fn test_error_slot() {
        let slot = ErrorSlot::default();
        let mut rx = slot.subscribe();
        slot.emit(ErrorEvent::CameraOpenError, "test");
        assert_eq!(slot.current(), Some(ErrorEvent::CameraOpenError));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        slot.emit(ErrorEvent::CameraOpenError, "again");
        assert!(rx.has_changed().unwrap());
        assert_eq!(slot.emitted(), 2);

        slot.dismiss();
        assert_eq!(slot.current(), None);
    }
}
