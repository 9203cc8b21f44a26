use std::fmt;

use glam::{DVec3, UVec2};
use serde::{Deserialize, Serialize};

/// Nominal width of a region in meters. Actual regions may be larger.
pub const REGION_WIDTH_METERS: u32 = 256;
/// Regions per block edge; a block is the unit of batched metadata fetch.
pub const BLOCK_SIZE_REGIONS: u32 = 16;
pub const BLOCK_WIDTH_METERS: u32 = REGION_WIDTH_METERS * BLOCK_SIZE_REGIONS;
/// Largest grid coordinate the block request can carry.
pub const MAX_GRID_COORD: u32 = u16::MAX as u32;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionHandle(pub u64);

impl RegionHandle {
    pub fn from_meters(x: u32, y: u32) -> Self {
        Self((u64::from(x) << 32) | u64::from(y))
    }

    pub fn from_grid(grid_x: u32, grid_y: u32) -> Self {
        Self::from_meters(
            grid_x.saturating_mul(REGION_WIDTH_METERS),
            grid_y.saturating_mul(REGION_WIDTH_METERS),
        )
    }

    /// Snaps a global position to the nominal region grid.
    pub fn from_global(pos: DVec3) -> Self {
        let x = snap_to_region(pos.x);
        let y = snap_to_region(pos.y);
        Self::from_meters(x, y)
    }

    pub fn meters(self) -> UVec2 {
        UVec2::new((self.0 >> 32) as u32, self.0 as u32)
    }

    pub fn grid(self) -> UVec2 {
        self.meters() / REGION_WIDTH_METERS
    }

    pub fn global_origin(self) -> DVec3 {
        let m = self.meters();
        DVec3::new(f64::from(m.x), f64::from(m.y), 0.0)
    }

    pub fn block(self) -> BlockId {
        BlockId::containing_grid(self.grid())
    }
}

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.meters();
        write!(f, "({}, {})", m.x, m.y)
    }
}

fn snap_to_region(coord: f64) -> u32 {
    if !coord.is_finite() || coord <= 0.0 {
        return 0;
    }
    let meters = coord.min(f64::from(u32::MAX)) as u32;
    meters - meters % REGION_WIDTH_METERS
}

/// A 16x16 region block, addressed in block units.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub x: u32,
    pub y: u32,
}

impl BlockId {
    pub fn containing_grid(grid: UVec2) -> Self {
        Self {
            x: grid.x / BLOCK_SIZE_REGIONS,
            y: grid.y / BLOCK_SIZE_REGIONS,
        }
    }

    pub fn containing_meters(meters: UVec2) -> Self {
        Self::containing_grid(meters / REGION_WIDTH_METERS)
    }

    /// Grid cells covered by this block, clamped to the wire range.
    pub fn grid_rect(self) -> GridRect {
        let min_x = self.x * BLOCK_SIZE_REGIONS;
        let min_y = self.y * BLOCK_SIZE_REGIONS;
        GridRect {
            min_x: clamp_grid(min_x),
            min_y: clamp_grid(min_y),
            max_x: clamp_grid(min_x + BLOCK_SIZE_REGIONS - 1),
            max_y: clamp_grid(min_y + BLOCK_SIZE_REGIONS - 1),
        }
    }
}

fn clamp_grid(value: u32) -> u16 {
    value.min(MAX_GRID_COORD) as u16
}

/// Inclusive rectangle in region-grid units, as carried by block requests.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridRect {
    pub min_x: u16,
    pub min_y: u16,
    pub max_x: u16,
    pub max_y: u16,
}

impl GridRect {
    pub fn contains(&self, grid: UVec2) -> bool {
        grid.x >= u32::from(self.min_x)
            && grid.x <= u32::from(self.max_x)
            && grid.y >= u32::from(self.min_y)
            && grid.y <= u32::from(self.max_y)
    }
}

/// Extents of a composite layer tile in grid units.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileExtents {
    pub left: u32,
    pub right: u32,
    pub bottom: u32,
    pub top: u32,
}

impl TileExtents {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.top.saturating_sub(self.bottom)
    }

    /// Meter rectangle spanned by the tile, as `(min, max)`.
    pub fn meters(&self) -> (UVec2, UVec2) {
        let min_x = self.left.saturating_mul(REGION_WIDTH_METERS);
        let min_y = self.bottom.saturating_mul(REGION_WIDTH_METERS);
        let max_x = min_x.saturating_add(self.width().saturating_mul(REGION_WIDTH_METERS));
        let max_y = min_y.saturating_add(self.height().saturating_mul(REGION_WIDTH_METERS));
        (UVec2::new(min_x, min_y), UVec2::new(max_x, max_y))
    }
}

#[cfg(test)]
mod tests {
    use glam::{DVec3, UVec2};

    use super::{BlockId, GridRect, RegionHandle, TileExtents, BLOCK_WIDTH_METERS};

    #[test]
    fn handle_packs_meters_into_high_and_low_words() {
        let handle = RegionHandle::from_meters(256_000, 512);
        assert_eq!(handle.0, (256_000u64 << 32) | 512);
        assert_eq!(handle.meters(), UVec2::new(256_000, 512));
        assert_eq!(handle.grid(), UVec2::new(1000, 2));
        assert_eq!(RegionHandle::from_grid(1000, 2), handle);
    }

    #[test]
    fn global_position_snaps_down_to_nominal_width() {
        let handle = RegionHandle::from_global(DVec3::new(1023.9, 300.0, 22.0));
        assert_eq!(handle.meters(), UVec2::new(768, 256));

        let clamped = RegionHandle::from_global(DVec3::new(-5.0, f64::NAN, 0.0));
        assert_eq!(clamped, RegionHandle::from_meters(0, 0));
    }

    #[test]
    fn blocks_cover_sixteen_regions() {
        assert_eq!(
            BlockId::containing_meters(UVec2::new(BLOCK_WIDTH_METERS - 1, 0)),
            BlockId { x: 0, y: 0 }
        );
        assert_eq!(
            BlockId::containing_meters(UVec2::new(BLOCK_WIDTH_METERS, 0)),
            BlockId { x: 1, y: 0 }
        );
        assert_eq!(
            RegionHandle::from_grid(1000, 1000).block(),
            BlockId { x: 62, y: 62 }
        );

        let rect = BlockId { x: 2, y: 1 }.grid_rect();
        assert_eq!(
            rect,
            GridRect {
                min_x: 32,
                min_y: 16,
                max_x: 47,
                max_y: 31
            }
        );
        assert!(rect.contains(UVec2::new(40, 20)));
        assert!(!rect.contains(UVec2::new(48, 20)));
    }

    #[test]
    fn tile_extents_convert_to_meters() {
        let tile = TileExtents {
            left: 1000,
            right: 1002,
            bottom: 1000,
            top: 1001,
        };
        let (min, max) = tile.meters();
        assert_eq!(min, UVec2::new(256_000, 256_000));
        assert_eq!(max, UVec2::new(256_512, 256_256));
    }
}
