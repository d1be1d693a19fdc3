//! Scroll-position reconciliation for the message list.
//!
//! The algorithms are pure functions of layout measurements the caller
//! takes from its renderer, so they test without one. The caller is
//! responsible for measuring only after the render has settled (in a
//! browser host that means two nested animation-frame callbacks before
//! reading heights); the prepend plan falls back to a height-delta
//! correction when the measured item count shows rendering incomplete.

use std::time::Duration;

use tokio::time::Instant;

/// Within this distance of the bottom, an appended message auto-scrolls
/// the view; further away the reader is in history and is left alone.
pub const BOTTOM_THRESHOLD_PX: f64 = 100.0;

/// Scrolling to within this distance of the top triggers loading the next
/// older page.
pub const TOP_THRESHOLD_PX: f64 = 100.0;

/// After the initial jump to the latest message, scroll-triggered loading
/// stays suppressed this long so layout settling is not misread as the
/// user scrolling to the top.
pub const INITIAL_SCROLL_GRACE: Duration = Duration::from_millis(500);

/// Scroll measurements of the list container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl Viewport {
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }

    /// The scroll offset that puts the end of the content at the bottom
    /// edge of the viewport.
    pub fn bottom_offset(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

/// One rendered message's box, in content coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemRect {
    pub top: f64,
    pub height: f64,
}

impl ItemRect {
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollPlan {
    /// Set `scroll_top` instantly.
    Jump(f64),
    /// Animate `scroll_top` smoothly.
    Smooth(f64),
    /// Leave the position untouched.
    Stay,
}

/// A message was appended. Follow the new bottom only if the view was
/// already near it.
pub fn plan_append(before: &Viewport, after_scroll_height: f64) -> ScrollPlan {
    if before.distance_from_bottom() <= BOTTOM_THRESHOLD_PX {
        ScrollPlan::Smooth((after_scroll_height - before.client_height).max(0.0))
    } else {
        ScrollPlan::Stay
    }
}

/// An older page was prepended. Anchor the view on the last element of the
/// just-loaded batch, bottom-aligned with the viewport bottom; that pins
/// the boundary between loaded and already-seen content regardless of how
/// tall individual messages render. Falls back to a height-delta
/// correction when fewer items than expected have rendered.
pub fn plan_prepend(
    before: &Viewport,
    after: &Viewport,
    items: &[ItemRect],
    total_before: usize,
    total_after: usize,
    batch_size: usize,
) -> ScrollPlan {
    let new_count = total_after.saturating_sub(total_before);
    if new_count == 0 {
        return ScrollPlan::Stay;
    }
    if items.len() >= new_count && batch_size > 0 {
        if let Some(anchor) = items.get(batch_size - 1) {
            return ScrollPlan::Jump((anchor.bottom() - after.client_height).max(0.0));
        }
    }
    ScrollPlan::Jump(before.scroll_top + (after.scroll_height - before.scroll_height))
}

/// Initial history load: jump straight to the latest message, no animation.
pub fn plan_initial(after: &Viewport) -> ScrollPlan {
    ScrollPlan::Jump(after.bottom_offset())
}

/// Per-conversation scroll state: the one-time initial anchor and the
/// grace period that follows it.
#[derive(Debug)]
pub struct ScrollReconciler {
    batch_size: usize,
    initial_anchored: bool,
    grace_until: Option<Instant>,
}

impl ScrollReconciler {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            initial_anchored: false,
            grace_until: None,
        }
    }

    /// Forget the initial anchor; called when the conversation switches.
    pub fn reset(&mut self) {
        self.initial_anchored = false;
        self.grace_until = None;
    }

    /// First successful history load only: returns the instant jump to the
    /// latest message and starts the grace period. Every later call is a
    /// no-op for the lifetime of the conversation.
    pub fn on_initial_load(&mut self, after: &Viewport) -> ScrollPlan {
        if self.initial_anchored {
            return ScrollPlan::Stay;
        }
        self.initial_anchored = true;
        self.grace_until = Some(Instant::now() + INITIAL_SCROLL_GRACE);
        plan_initial(after)
    }

    pub fn on_append(&self, before: &Viewport, after_scroll_height: f64) -> ScrollPlan {
        plan_append(before, after_scroll_height)
    }

    pub fn on_prepend(
        &self,
        before: &Viewport,
        after: &Viewport,
        items: &[ItemRect],
        total_before: usize,
        total_after: usize,
    ) -> ScrollPlan {
        plan_prepend(before, after, items, total_before, total_after, self.batch_size)
    }

    /// Whether a scroll position should trigger loading the next older
    /// page right now.
    pub fn should_load_more(&self, viewport: &Viewport, loading: bool, has_more: bool) -> bool {
        if loading || !has_more || !self.initial_anchored {
            return false;
        }
        if let Some(grace) = self.grace_until {
            if Instant::now() < grace {
                return false;
            }
        }
        viewport.scroll_top <= TOP_THRESHOLD_PX
    }
}
