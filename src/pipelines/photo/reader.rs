// SPDX-License-Identifier: GPL-3.0-only

//! Bounded pool of still images presented by a rendering context
//!
//! The reader is the output target of a still capture. Each presented frame
//! becomes an image in the pool; consumers acquire one as a
//! [`CapturedBuffer`] and must close it to give the slot back.

use crate::backends::camera::Resolution;
use crate::errors::{PhotoError, RenderError};
use crate::gpu::{FrameSink, RenderedFrame};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

struct ReaderInner {
    size: Resolution,
    max_images: usize,
    queued: Mutex<VecDeque<RenderedFrame>>,
    outstanding: AtomicUsize,
    closed: AtomicU64,
    notify: Notify,
}

impl ReaderInner {
    fn queue(&self) -> MutexGuard<'_, VecDeque<RenderedFrame>> {
        self.queued.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Still-image output target
#[derive(Clone)]
pub struct ImageReader {
    inner: Arc<ReaderInner>,
}

impl ImageReader {
    pub fn new(size: Resolution, max_images: usize) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                size,
                max_images: max_images.max(1),
                queued: Mutex::new(VecDeque::new()),
                outstanding: AtomicUsize::new(0),
                closed: AtomicU64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    pub fn size(&self) -> Resolution {
        self.inner.size
    }

    /// Images acquired and not yet closed
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Images waiting to be acquired
    pub fn queued(&self) -> usize {
        self.inner.queue().len()
    }

    /// Buffers closed over the reader's lifetime
    pub fn closed_count(&self) -> u64 {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Take the newest image, discarding older ones
    pub fn acquire_latest(&self) -> Option<CapturedBuffer> {
        let mut queue = self.inner.queue();
        let frame = queue.pop_back()?;
        let dropped = queue.len();
        queue.clear();
        drop(queue);
        if dropped > 0 {
            debug!(dropped, "Discarded older still images");
        }
        Some(self.hand_out(frame))
    }

    /// Wait up to `timeout` for an image, taking the newest
    pub async fn acquire_next(&self, timeout: Duration) -> Result<CapturedBuffer, PhotoError> {
        let wait = async {
            loop {
                let notified = self.inner.notify.notified();
                if let Some(buffer) = self.acquire_latest() {
                    return buffer;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| PhotoError::NoFrameAvailable)
    }

    fn hand_out(&self, frame: RenderedFrame) -> CapturedBuffer {
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        CapturedBuffer {
            frame,
            reader: Arc::clone(&self.inner),
            open: true,
        }
    }
}

impl FrameSink for ImageReader {
    fn present(&self, frame: RenderedFrame) -> Result<(), RenderError> {
        let mut queue = self.inner.queue();
        let in_use = self.outstanding();
        if in_use >= self.inner.max_images {
            return Err(RenderError::TransientGlitch(format!(
                "all {} still images are in use",
                in_use
            )));
        }
        while queue.len() + in_use >= self.inner.max_images {
            queue.pop_front();
        }
        queue.push_back(frame);
        drop(queue);
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

impl std::fmt::Debug for ImageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageReader")
            .field("size", &self.inner.size)
            .field("max_images", &self.inner.max_images)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// An acquired still image; returns its slot to the pool when closed
pub struct CapturedBuffer {
    frame: RenderedFrame,
    reader: Arc<ReaderInner>,
    open: bool,
}

impl CapturedBuffer {
    pub fn frame(&self) -> &RenderedFrame {
        &self.frame
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.open, false) {
            self.reader.outstanding.fetch_sub(1, Ordering::SeqCst);
            self.reader.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for CapturedBuffer {
    fn drop(&mut self) {
        if self.open {
            warn!(sequence = self.frame.sequence, "Still image dropped without close");
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::PixelLayout;

    fn frame(sequence: u64) -> RenderedFrame {
        RenderedFrame {
            width: 2,
            height: 1,
            stride: 256,
            layout: PixelLayout::Rgba8,
            data: Arc::from(vec![0u8; 256]),
            sequence,
        }
    }

    #[test]
    fn test_latest_wins() {
        let reader = ImageReader::new(Resolution::new(2, 1), 2);
        reader.present(frame(1)).unwrap();
        reader.present(frame(2)).unwrap();
        reader.present(frame(3)).unwrap();
        assert_eq!(reader.queued(), 2);

        let buffer = reader.acquire_latest().unwrap();
        assert_eq!(buffer.frame().sequence, 3);
        assert_eq!(reader.queued(), 0);
        assert_eq!(reader.outstanding(), 1);
        buffer.close();
        assert_eq!(reader.outstanding(), 0);
        assert_eq!(reader.closed_count(), 1);
    }

    #[test]
    fn test_full_pool_rejects_frames() {
        let reader = ImageReader::new(Resolution::new(2, 1), 1);
        reader.present(frame(1)).unwrap();
        let held = reader.acquire_latest().unwrap();

        let err = reader.present(frame(2)).unwrap_err();
        assert!(err.is_transient());

        held.close();
        reader.present(frame(3)).unwrap();
    }

    #[test]
    fn test_drop_closes_once() {
        let reader = ImageReader::new(Resolution::new(2, 1), 2);
        reader.present(frame(1)).unwrap();
        drop(reader.acquire_latest().unwrap());
        assert_eq!(reader.outstanding(), 0);
        assert_eq!(reader.closed_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_next_waits_for_present() {
        let reader = ImageReader::new(Resolution::new(2, 1), 2);
        let producer = reader.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.present(frame(7)).unwrap();
        });

        let buffer = reader.acquire_next(Duration::from_secs(2)).await.unwrap();
        assert_eq!(buffer.frame().sequence, 7);
        buffer.close();
    }

    #[tokio::test]
    async fn test_acquire_next_times_out() {
        let reader = ImageReader::new(Resolution::new(2, 1), 2);
        let result = reader.acquire_next(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(PhotoError::NoFrameAvailable)));
    }
}
