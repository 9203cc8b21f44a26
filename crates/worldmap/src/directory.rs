use std::time::Instant;

use glam::{DVec3, UVec2};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};
use uuid::Uuid;
use worldmap_shared::coords::{RegionHandle, REGION_WIDTH_METERS};
use worldmap_shared::protocol::{MapLayer, RegionBlock, RegionFlags, SimAccess};

use crate::bounds::BoundsTracker;
use crate::texture::{self, BoundImage, TextureBooster, TileSource};

/// Cached metadata for one region.
#[derive(Debug)]
pub struct SimInfo {
    pub handle: RegionHandle,
    pub name: String,
    pub access: SimAccess,
    pub region_flags: RegionFlags,
    /// Region size in meters.
    pub size: UVec2,
    /// Agent count forced by the renderer, -1 when unset.
    pub agents_count: i32,
    /// Fade-in blend, -1.0 when not fading.
    pub alpha: f32,
    pub agents_update_time: Option<Instant>,
    image_ids: [Option<Uuid>; MapLayer::COUNT],
    images: [Option<BoundImage>; MapLayer::COUNT],
}

impl SimInfo {
    fn new(handle: RegionHandle) -> Self {
        Self {
            handle,
            name: String::new(),
            access: SimAccess::MIN,
            region_flags: RegionFlags::empty(),
            size: UVec2::splat(REGION_WIDTH_METERS),
            agents_count: -1,
            alpha: -1.0,
            agents_update_time: None,
            image_ids: [None; MapLayer::COUNT],
            images: [None, None, None],
        }
    }

    pub fn image_id(&self, layer: MapLayer) -> Option<Uuid> {
        self.image_ids[layer.index()]
    }

    pub fn image(&self, layer: MapLayer) -> Option<&BoundImage> {
        self.images[layer.index()].as_ref()
    }

    pub fn global_origin(&self) -> DVec3 {
        self.handle.global_origin()
    }

    /// Converts a region-local position to global coordinates.
    pub fn global_pos(&self, local: DVec3) -> DVec3 {
        self.global_origin() + local
    }

    pub fn covers(&self, meters: UVec2) -> bool {
        let origin = self.handle.meters();
        meters.x >= origin.x
            && meters.y >= origin.y
            && u64::from(meters.x) < u64::from(origin.x) + u64::from(self.size.x)
            && u64::from(meters.y) < u64::from(origin.y) + u64::from(self.size.y)
    }

    fn release_image(&mut self, layer: MapLayer, booster: &mut dyn TextureBooster) -> bool {
        match self.images[layer.index()].take() {
            Some(image) => {
                texture::unbind(image, booster);
                true
            }
            None => false,
        }
    }
}

/// Fields a reply carries for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionUpdate {
    pub handle: RegionHandle,
    pub name: String,
    pub access: SimAccess,
    pub region_flags: RegionFlags,
    pub layer: MapLayer,
    pub image_id: Option<Uuid>,
    pub size: Option<UVec2>,
}

impl RegionUpdate {
    pub fn from_block(layer: MapLayer, block: &RegionBlock) -> Self {
        // Sizes must be non-zero multiples of 16 m, anything else means "default".
        let size = block
            .size
            .filter(|&(x, y)| x != 0 && y != 0 && x % 16 == 0 && y % 16 == 0)
            .map(|(x, y)| UVec2::new(x.into(), y.into()));
        Self {
            handle: block.handle(),
            name: block.name.clone(),
            access: block.access,
            region_flags: RegionFlags::from_bits_retain(block.region_flags),
            layer,
            image_id: Some(block.image_id).filter(|id| !id.is_nil()),
            size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub created: bool,
    pub bounds_changed: bool,
}

#[derive(Debug, Default)]
pub struct RegionDirectory {
    sims: FxHashMap<RegionHandle, SimInfo>,
    absent: FxHashSet<RegionHandle>,
    bounds: BoundsTracker,
}

impl RegionDirectory {
    pub fn lookup_by_handle(&self, handle: RegionHandle) -> Option<&SimInfo> {
        self.sims.get(&handle)
    }

    pub fn lookup_by_handle_mut(&mut self, handle: RegionHandle) -> Option<&mut SimInfo> {
        self.sims.get_mut(&handle)
    }

    /// Exact match first, then any variable-size region whose extent covers the handle.
    pub fn lookup_covering(&self, handle: RegionHandle) -> Option<&SimInfo> {
        if let Some(info) = self.sims.get(&handle) {
            return Some(info);
        }
        let meters = handle.meters();
        self.sims.values().find(|info| info.covers(meters))
    }

    /// Divides by the nominal region width, not the actual one.
    pub fn lookup_by_global_position(&self, pos: DVec3) -> Option<&SimInfo> {
        self.lookup_covering(RegionHandle::from_global(pos))
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&SimInfo> {
        if name.is_empty() {
            return None;
        }
        self.sims.values().find(|info| names_match(&info.name, name))
    }

    pub fn name_at_global_position(&self, pos: DVec3) -> Option<&str> {
        self.sims
            .get(&RegionHandle::from_global(pos))
            .map(|info| info.name.as_str())
    }

    pub fn upsert(&mut self, update: RegionUpdate, booster: &mut dyn TextureBooster) -> UpsertOutcome {
        let handle = update.handle;
        self.absent.remove(&handle);

        let created = !self.sims.contains_key(&handle);
        let info = self
            .sims
            .entry(handle)
            .or_insert_with(|| SimInfo::new(handle));

        info.name = update.name;
        info.access = update.access;
        info.region_flags = update.region_flags;
        if let Some(size) = update.size {
            info.size = size;
        }

        let slot = update.layer.index();
        if info.image_ids[slot] != update.image_id {
            if info.release_image(update.layer, booster) {
                debug!(
                    "Dropped stale {} image for region {} ({})",
                    update.layer, info.name, handle
                );
            }
            info.image_ids[slot] = update.image_id;
        }

        let origin = handle.meters();
        let size = info.size;
        let bounds_changed = self.bounds.extend(
            origin.x,
            origin.y,
            origin.x.saturating_add(size.x),
            origin.y.saturating_add(size.y),
        );

        UpsertOutcome {
            created,
            bounds_changed,
        }
    }

    /// Remembers that the grid has no region at `handle`. Returns true if this is news.
    pub fn mark_nonexistent(&mut self, handle: RegionHandle) -> bool {
        if self.sims.contains_key(&handle) {
            return false;
        }
        self.absent.insert(handle)
    }

    pub fn is_known_absent(&self, handle: RegionHandle) -> bool {
        self.absent.contains(&handle)
    }

    pub fn is_known(&self, handle: RegionHandle) -> bool {
        self.sims.contains_key(&handle) || self.absent.contains(&handle)
    }

    /// Binds the region's image for `layer` if it is not bound yet and borrows it.
    pub fn bind_image(
        &mut self,
        handle: RegionHandle,
        layer: MapLayer,
        web_tiles_url: Option<&str>,
        booster: &mut dyn TextureBooster,
    ) -> Option<&BoundImage> {
        let info = self.sims.get_mut(&handle)?;
        let slot = layer.index();
        if info.images[slot].is_none() {
            let source = match (layer, web_tiles_url) {
                (MapLayer::Objects, Some(url)) => TileSource::objects_tile(url, handle),
                _ => TileSource::Asset(info.image_ids[slot]?),
            };
            info.images[slot] = Some(texture::bind(source, booster));
        }
        info.images[slot].as_ref()
    }

    /// Drops held images for one layer or all of them; metadata stays.
    pub fn clear_image_references(&mut self, layer: Option<MapLayer>, booster: &mut dyn TextureBooster) -> usize {
        let mut released = 0;
        for info in self.sims.values_mut() {
            for candidate in MapLayer::ALL {
                if layer.map_or(true, |l| l == candidate) && info.release_image(candidate, booster) {
                    released += 1;
                }
            }
        }
        released
    }

    pub fn remove(&mut self, handle: RegionHandle, booster: &mut dyn TextureBooster) -> bool {
        self.absent.remove(&handle);
        match self.sims.remove(&handle) {
            Some(mut info) => {
                for layer in MapLayer::ALL {
                    info.release_image(layer, booster);
                }
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self, booster: &mut dyn TextureBooster) {
        self.clear_image_references(None, booster);
        self.sims.clear();
        self.absent.clear();
        self.bounds.reset();
    }

    pub fn bounds(&self) -> &BoundsTracker {
        &self.bounds
    }

    pub(crate) fn bounds_mut(&mut self) -> &mut BoundsTracker {
        &mut self.bounds
    }

    pub fn len(&self) -> usize {
        self.sims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sims.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RegionHandle, &SimInfo)> {
        self.sims.iter()
    }

    pub fn dump(&self, current_layer: MapLayer) {
        for (handle, info) in &self.sims {
            let image = info
                .image(current_layer)
                .map(|image| format!("{:?}", image.source()))
                .unwrap_or_else(|| "none".to_string());
            info!(
                "{} {} - Access: {} - Flags: {:#x} - Size: {}x{} - {} image: {}",
                info.name,
                handle,
                info.access.0,
                info.region_flags.bits(),
                info.size.x,
                info.size.y,
                current_layer,
                image
            );
        }
    }
}

/// Region names compare case-insensitively; the grid returns canonical casing.
pub(crate) fn names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}
