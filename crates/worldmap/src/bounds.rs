use glam::UVec2;
use tracing::debug;

/// Smallest meter rectangle covering every region seen so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundsTracker {
    min: UVec2,
    max: UVec2,
}

impl Default for BoundsTracker {
    fn default() -> Self {
        Self {
            min: UVec2::splat(u32::MAX),
            max: UVec2::ZERO,
        }
    }
}

impl BoundsTracker {
    /// Grows the rectangle; returns true if any edge moved.
    pub fn extend(&mut self, min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> bool {
        let mut changed = false;
        if min_x < self.min.x {
            self.min.x = min_x;
            changed = true;
        }
        if min_y < self.min.y {
            self.min.y = min_y;
            changed = true;
        }
        if max_x > self.max.x {
            self.max.x = max_x;
            changed = true;
        }
        if max_y > self.max.y {
            self.max.y = max_y;
            changed = true;
        }
        if changed {
            debug!(
                "World map bounds: ({}, {}) - ({}, {})",
                self.min.x, self.min.y, self.max.x, self.max.y
            );
        }
        changed
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        !self.is_empty() && x >= self.min.x && x <= self.max.x && y >= self.min.y && y <= self.max.y
    }

    pub fn min(&self) -> Option<UVec2> {
        (!self.is_empty()).then_some(self.min)
    }

    pub fn max(&self) -> Option<UVec2> {
        (!self.is_empty()).then_some(self.max)
    }

    pub fn width(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.max.x - self.min.x
        }
    }

    pub fn height(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.max.y - self.min.y
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::UVec2;

    use super::BoundsTracker;

    #[test]
    fn starts_empty() {
        let bounds = BoundsTracker::default();
        assert!(bounds.is_empty());
        assert_eq!(bounds.width(), 0);
        assert_eq!(bounds.min(), None);
        assert!(!bounds.contains(0, 0));
    }

    #[test]
    fn grows_monotonically_and_reports_changes() {
        let mut bounds = BoundsTracker::default();
        assert!(bounds.extend(256, 256, 512, 512));
        assert!(!bounds.extend(300, 300, 400, 400));
        assert!(bounds.extend(0, 300, 400, 768));

        assert_eq!(bounds.min(), Some(UVec2::new(0, 256)));
        assert_eq!(bounds.max(), Some(UVec2::new(512, 768)));
        assert_eq!(bounds.width(), 512);
        assert_eq!(bounds.height(), 512);
        assert!(bounds.contains(0, 256));
        assert!(!bounds.contains(0, 255));
    }

    #[test]
    fn reset_returns_to_empty() {
        let mut bounds = BoundsTracker::default();
        bounds.extend(0, 0, 10, 10);
        bounds.reset();
        assert!(bounds.is_empty());
        assert!(bounds.extend(5, 5, 6, 6));
    }
}
