use std::sync::{Arc, Mutex, MutexGuard};

use super::frame::SpectrumFrame;
use crate::error::BinCountMismatch;

/// Rendezvous between the decoder thread (sole writer) and the render loop
/// (sole reader). Holds zero or one frame behind an `Arc`.
///
/// The lock only guards the handle swap, so neither side ever waits on
/// decoding or drawing. Readers get a whole frame or nothing.
#[derive(Default)]
pub struct FrameSlot {
    current: Mutex<Option<Arc<SpectrumFrame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame. A frame whose bin count differs from the
    /// one already published is rejected and the old frame stays current.
    pub fn publish(&self, frame: SpectrumFrame) -> Result<(), BinCountMismatch> {
        let frame = Arc::new(frame);
        let mut current = self.lock();
        if let Some(existing) = current.as_ref() {
            if existing.len() != frame.len() {
                return Err(BinCountMismatch {
                    expected: existing.len(),
                    actual: frame.len(),
                });
            }
        }
        *current = Some(frame);
        Ok(())
    }

    /// Most recently published frame, or `None` before the first publish.
    pub fn load(&self) -> Option<Arc<SpectrumFrame>> {
        self.lock().clone()
    }

    /// Forget the current frame; the next run may report a different bin count.
    pub fn clear(&self) {
        self.lock().take();
    }

    // The guarded value is always a complete handle, so a panic while the
    // lock was held cannot leave it half written.
    fn lock(&self) -> MutexGuard<'_, Option<Arc<SpectrumFrame>>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
