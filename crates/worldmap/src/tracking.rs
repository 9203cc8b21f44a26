use glam::DVec3;
use tracing::{debug, info};
use worldmap_shared::coords::RegionHandle;
use worldmap_shared::protocol::RegionBlock;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrackingState {
    /// Waiting for a block reply that covers the position.
    Loading,
    Found,
    /// The grid says nothing is there, or the region is down.
    Invalid,
}

/// A map position picked before its region was known.
#[derive(Debug, Default)]
pub struct LocationTracker {
    target: Option<(DVec3, TrackingState)>,
}

impl LocationTracker {
    pub fn track(&mut self, pos: DVec3) {
        debug!("Tracking unknown location ({}, {})", pos.x, pos.y);
        self.target = Some((pos, TrackingState::Loading));
    }

    pub fn clear(&mut self) {
        self.target = None;
    }

    pub fn position(&self) -> Option<DVec3> {
        self.target.map(|(pos, _)| pos)
    }

    pub fn state(&self) -> Option<TrackingState> {
        self.target.map(|(_, state)| state)
    }

    pub fn is_tracking(&self, handle: RegionHandle) -> bool {
        self.position()
            .is_some_and(|pos| RegionHandle::from_global(pos) == handle)
    }

    /// Settles the tracked position against one block reply.
    pub fn on_block_reply(&mut self, regions: &[RegionBlock]) -> Option<TrackingState> {
        let (pos, state) = self.target.as_mut()?;
        let tracked = RegionHandle::from_global(*pos);
        for region in regions.iter().filter(|region| region.handle() == tracked) {
            *state = if region.access.is_nonexistent() || region.access.is_down() {
                TrackingState::Invalid
            } else {
                TrackingState::Found
            };
            info!("Tracked location in {tracked} is {state:?}");
        }
        Some(*state)
    }

    /// Settles against a region that is already known.
    pub fn settle(&mut self, state: TrackingState) {
        if let Some((_, current)) = self.target.as_mut() {
            *current = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec3;
    use uuid::Uuid;
    use worldmap_shared::coords::RegionHandle;
    use worldmap_shared::protocol::{RegionBlock, SimAccess};

    use super::{LocationTracker, TrackingState};

    fn entry(grid_x: u16, grid_y: u16, access: SimAccess) -> RegionBlock {
        RegionBlock {
            grid_x,
            grid_y,
            name: "Tracked".to_string(),
            access,
            region_flags: 0,
            image_id: Uuid::nil(),
            size: None,
        }
    }

    #[test]
    fn unrelated_replies_keep_loading() {
        let mut tracker = LocationTracker::default();
        assert_eq!(tracker.on_block_reply(&[entry(1, 1, SimAccess::PG)]), None);

        tracker.track(DVec3::new(300.0, 40.0, 20.0));
        assert_eq!(tracker.on_block_reply(&[entry(2, 0, SimAccess::PG)]), Some(TrackingState::Loading));
        assert!(tracker.is_tracking(RegionHandle::from_grid(1, 0)));
        assert_eq!(tracker.on_block_reply(&[entry(1, 0, SimAccess::PG)]), Some(TrackingState::Found));

        tracker.clear();
        assert_eq!(tracker.state(), None);
    }

    #[test]
    fn down_or_missing_regions_invalidate() {
        let mut tracker = LocationTracker::default();
        tracker.track(DVec3::new(10.0, 10.0, 0.0));
        tracker.on_block_reply(&[entry(0, 0, SimAccess::DOWN)]);
        assert_eq!(tracker.state(), Some(TrackingState::Invalid));

        tracker.track(DVec3::new(10.0, 10.0, 0.0));
        tracker.on_block_reply(&[entry(0, 0, SimAccess::NONEXISTENT)]);
        assert_eq!(tracker.state(), Some(TrackingState::Invalid));
    }
}
