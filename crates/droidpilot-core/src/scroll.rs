//! Scroll gestures and scroll-until-found loops.
//!
//! A scroll is a swipe whose geometry comes from either a scrollable element's
//! bounds or a fixed screen anchor. `scroll_until*` repeats
//! snapshot → check → scroll → snapshot until the predicate matches or two
//! consecutive snapshots are identical, which means the region stopped moving.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::config::SCROLL_SETTLE_MS;
use crate::context::DeviceContext;
use crate::element::{Bounds, UiElement};
use crate::error::{Result, ScriptError};
use crate::query::{by, Snapshot};

/// Distance covered by a screen-anchored scroll.
const ANCHOR_SCROLL_DISTANCE: i32 = 500;

/// Duration of a swipe gesture (as opposed to a scroll).
const SWIPE_DURATION_MS: u64 = 100;

/// Direction the content moves towards. `Down` reveals what is below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

/// Geometry of a single swipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gesture {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
    pub duration_ms: u64,
}

impl Gesture {
    /// Maps a speed from 1 (slow) to 10 (fast) to a swipe duration.
    pub fn duration_for_speed(speed: u8) -> u64 {
        1100 - u64::from(speed.clamp(1, 10)) * 100
    }

    /// A scroll inside `bounds`, travelling 60% of the element's extent.
    ///
    /// Scrolling down moves the finger upwards, from 80% to 20% of the height.
    pub fn within(bounds: &Bounds, direction: Direction, speed: u8) -> Self {
        let (cx, cy) = bounds.center();
        let at = |from: i32, extent: i32, percent: i32| from + extent * percent / 100;
        let (start_x, start_y, end_x, end_y) = match direction {
            Direction::Down => (cx, at(bounds.top, bounds.height(), 80), cx, at(bounds.top, bounds.height(), 20)),
            Direction::Up => (cx, at(bounds.top, bounds.height(), 20), cx, at(bounds.top, bounds.height(), 80)),
            Direction::Right => (at(bounds.left, bounds.width(), 80), cy, at(bounds.left, bounds.width(), 20), cy),
            Direction::Left => (at(bounds.left, bounds.width(), 20), cy, at(bounds.left, bounds.width(), 80), cy),
        };
        Self {
            start_x,
            start_y,
            end_x,
            end_y,
            duration_ms: Self::duration_for_speed(speed),
        }
    }

    /// A scroll starting at a fixed screen point. End coordinates never go negative.
    pub fn from_anchor(x: i32, y: i32, direction: Direction, speed: u8) -> Self {
        let (end_x, end_y) = match direction {
            Direction::Down => (x, y - ANCHOR_SCROLL_DISTANCE),
            Direction::Up => (x, y + ANCHOR_SCROLL_DISTANCE),
            Direction::Right => (x - ANCHOR_SCROLL_DISTANCE, y),
            Direction::Left => (x + ANCHOR_SCROLL_DISTANCE, y),
        };
        Self {
            start_x: x,
            start_y: y,
            end_x: end_x.max(0),
            end_y: end_y.max(0),
            duration_ms: Self::duration_for_speed(speed),
        }
    }
}

/// Where a scroll loop takes its gesture from.
enum Origin {
    Element(UiElement),
    Anchor(i32, i32),
}

fn require_scrollable(element: &UiElement) -> Result<()> {
    if element.scrollable {
        Ok(())
    } else {
        Err(ScriptError::ItemNotScrollable(element.to_string()).into())
    }
}

impl DeviceContext {
    async fn perform(&self, g: Gesture) -> Result<()> {
        debug!(gesture = ?g, "scroll gesture");
        self.guard(self.driver().swipe(g.start_x, g.start_y, g.end_x, g.end_y, g.duration_ms))
            .await
    }

    /// Scroll `element` once. Fails with `ItemNotScrollable` if it cannot scroll.
    pub async fn scroll(&self, element: &UiElement, direction: Direction, speed: u8) -> Result<()> {
        require_scrollable(element)?;
        self.perform(Gesture::within(&element.bounds, direction, speed)).await
    }

    /// Scroll the first scrollable element on screen.
    pub async fn scroll_on_first(&self, direction: Direction, speed: u8) -> Result<UiElement> {
        let element = self.first_scrollable().await?;
        self.scroll(&element, direction, speed).await?;
        Ok(element)
    }

    /// Scroll from a fixed screen point, with no element precondition.
    pub async fn scroll_at(&self, direction: Direction, speed: u8, x: i32, y: i32) -> Result<()> {
        self.perform(Gesture::from_anchor(x, y, direction, speed)).await
    }

    /// Scroll from the configured anchor at the configured speed.
    pub async fn scroll_screen(&self, direction: Direction) -> Result<()> {
        let (x, y) = self.config.scroll_anchor;
        self.scroll_at(direction, self.config.scroll_speed, x, y).await
    }

    /// Scroll `element` until an element matching `predicate` appears.
    pub async fn scroll_until<P>(
        &self,
        element: &UiElement,
        direction: Direction,
        speed: u8,
        predicate: P,
    ) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        require_scrollable(element)?;
        self.scroll_loop(Origin::Element(element.clone()), direction, speed, predicate)
            .await
    }

    /// Scroll the first scrollable element until `predicate` matches.
    pub async fn scroll_until_on_first<P>(
        &self,
        direction: Direction,
        speed: u8,
        predicate: P,
    ) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        let element = self.first_scrollable().await?;
        self.scroll_loop(Origin::Element(element), direction, speed, predicate)
            .await
    }

    /// Scroll from a fixed screen point until `predicate` matches.
    pub async fn scroll_until_at<P>(
        &self,
        direction: Direction,
        speed: u8,
        x: i32,
        y: i32,
        predicate: P,
    ) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        self.scroll_loop(Origin::Anchor(x, y), direction, speed, predicate)
            .await
    }

    /// A quick fling across `element`.
    pub async fn swipe(&self, element: &UiElement, direction: Direction) -> Result<()> {
        let gesture = Gesture {
            duration_ms: SWIPE_DURATION_MS,
            ..Gesture::within(&element.bounds, direction, 10)
        };
        self.perform(gesture).await
    }

    async fn first_scrollable(&self) -> Result<UiElement> {
        self.find_first_or_none(by::scrollable())
            .await?
            .ok_or_else(|| ScriptError::ItemNotScrollable("no scrollable element on screen".into()).into())
    }

    async fn scroll_loop<P>(
        &self,
        origin: Origin,
        direction: Direction,
        speed: u8,
        predicate: P,
    ) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool + Send + Sync,
    {
        let gesture = match &origin {
            Origin::Element(element) => Gesture::within(&element.bounds, direction, speed),
            Origin::Anchor(x, y) => Gesture::from_anchor(*x, *y, direction, speed),
        };

        let start = Instant::now();
        let mut scrolls = 0u32;
        let mut current: Snapshot = self.snapshot().await?;
        loop {
            if let Some(found) = current.find_first_or_none(&predicate) {
                debug!(scrolls, elapsed_ms = start.elapsed().as_millis() as u64, "scroll target found");
                return Ok(found);
            }

            self.perform(gesture).await?;
            scrolls += 1;
            self.wait(SCROLL_SETTLE_MS).await?;

            let next = self.snapshot().await?;
            if next.same_content(&current) {
                debug!(scrolls, "scroll region stopped moving");
                return Err(ScriptError::EndOfScroll.into());
            }
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_to_duration() {
        assert_eq!(Gesture::duration_for_speed(1), 1000);
        assert_eq!(Gesture::duration_for_speed(5), 600);
        assert_eq!(Gesture::duration_for_speed(10), 100);
        assert_eq!(Gesture::duration_for_speed(0), 1000);
        assert_eq!(Gesture::duration_for_speed(42), 100);
    }

    #[test]
    fn test_scroll_down_within_bounds_moves_finger_up() {
        let bounds = Bounds::new(0, 200, 1080, 1200);
        let g = Gesture::within(&bounds, Direction::Down, 5);
        assert_eq!((g.start_x, g.start_y), (540, 1000));
        assert_eq!((g.end_x, g.end_y), (540, 400));
        assert_eq!(g.duration_ms, 600);
    }

    #[test]
    fn test_horizontal_scroll_within_bounds() {
        let bounds = Bounds::new(0, 0, 1000, 100);
        let g = Gesture::within(&bounds, Direction::Left, 5);
        assert_eq!((g.start_x, g.end_x), (200, 800));
        assert_eq!(g.start_y, 50);
    }

    #[test]
    fn test_anchor_scroll_clamps_at_zero() {
        let g = Gesture::from_anchor(540, 300, Direction::Down, 5);
        assert_eq!((g.end_x, g.end_y), (540, 0));
        let g = Gesture::from_anchor(540, 960, Direction::Up, 5);
        assert_eq!(g.end_y, 1460);
    }

    #[test]
    fn test_default_direction_is_down() {
        assert_eq!(Direction::default(), Direction::Down);
    }
}
