use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-slot flag that keeps check cycles from overlapping.
#[derive(Debug, Clone, Default)]
pub struct CycleGuard {
    busy: Arc<AtomicBool>,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot, or returns `None` while another cycle holds it.
    pub fn try_enter(&self) -> Option<CycleSlot> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleSlot {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// RAII guard; the slot frees when this drops.
#[derive(Debug)]
pub struct CycleSlot {
    busy: Arc<AtomicBool>,
}

impl Drop for CycleSlot {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
