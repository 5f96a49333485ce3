//! Loading overlay lifecycle
//!
//! The overlay surface is shared by every pipeline. The controller counts
//! holders: the surface is shown when the first guard is taken and hidden
//! when the last guard is dropped, on every exit path.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Presentation of the loading overlay (owned by the host page)
pub trait OverlaySurface: Send + Sync + fmt::Debug {
    /// Make the overlay visible with `message`
    fn show(&self, message: &str);

    /// Remove the overlay
    fn hide(&self);
}

/// Surface that draws nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOverlay;

impl OverlaySurface for NoopOverlay {
    fn show(&self, _message: &str) {}

    fn hide(&self) {}
}

#[derive(Debug)]
struct OverlayState {
    surface: Arc<dyn OverlaySurface>,
    holders: Mutex<usize>,
}

/// Reference-counted overlay controller; clones share the count
#[derive(Debug, Clone)]
pub struct OverlayController {
    state: Arc<OverlayState>,
}

impl OverlayController {
    /// Create controller driving `surface`
    #[must_use]
    pub fn new(surface: Arc<dyn OverlaySurface>) -> Self {
        Self {
            state: Arc::new(OverlayState {
                surface,
                holders: Mutex::new(0),
            }),
        }
    }

    /// Take a hold on the overlay, showing it if it was hidden
    #[must_use = "the overlay is hidden again when the guard drops"]
    pub fn acquire(&self, message: &str) -> OverlayGuard {
        let mut holders = self.state.holders.lock();
        if *holders == 0 {
            self.state.surface.show(message);
        }
        *holders += 1;
        OverlayGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Number of live guards
    #[must_use]
    pub fn holders(&self) -> usize {
        *self.state.holders.lock()
    }

    /// Whether the overlay is currently shown
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.holders() > 0
    }
}

impl Default for OverlayController {
    fn default() -> Self {
        Self::new(Arc::new(NoopOverlay))
    }
}

/// Hold on the overlay; dropping it releases the hold
#[derive(Debug)]
pub struct OverlayGuard {
    state: Arc<OverlayState>,
}

impl Drop for OverlayGuard {
    fn drop(&mut self) {
        let mut holders = self.state.holders.lock();
        *holders = holders.saturating_sub(1);
        if *holders == 0 {
            self.state.surface.hide();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct CountingSurface {
        shows: Mutex<usize>,
        hides: Mutex<usize>,
    }

    impl OverlaySurface for CountingSurface {
        fn show(&self, _message: &str) {
            *self.shows.lock() += 1;
        }

        fn hide(&self) {
            *self.hides.lock() += 1;
        }
    }

    #[test]
    fn guard_shows_and_hides() {
        let surface = Arc::new(CountingSurface::default());
        let controller = OverlayController::new(surface.clone());

        let guard = controller.acquire("Loading");
        assert!(controller.is_visible());
        drop(guard);

        assert!(!controller.is_visible());
        assert_eq!(*surface.shows.lock(), 1);
        assert_eq!(*surface.hides.lock(), 1);
    }

    #[test]
    fn nested_guards_hide_only_once() {
        let surface = Arc::new(CountingSurface::default());
        let controller = OverlayController::new(surface.clone());

        let first = controller.acquire("a");
        let second = controller.clone().acquire("b");
        assert_eq!(controller.holders(), 2);

        drop(first);
        assert!(controller.is_visible());
        assert_eq!(*surface.hides.lock(), 0);

        drop(second);
        assert!(!controller.is_visible());
        assert_eq!(*surface.shows.lock(), 1);
        assert_eq!(*surface.hides.lock(), 1);
    }

    #[test]
    fn guard_released_on_early_return() {
        fn fails(controller: &OverlayController) -> Result<(), &'static str> {
            let _guard = controller.acquire("x");
            Err("boom")
        }

        let controller = OverlayController::default();
        assert!(fails(&controller).is_err());
        assert!(!controller.is_visible());
    }
}
