use glam::{DVec3, UVec2};
use tracing::{info, warn};
use worldmap_shared::coords::RegionHandle;
use worldmap_shared::protocol::{ItemCategory, MapLayer, MapReply};

use crate::config::WorldMapConfig;
use crate::directory::{RegionDirectory, SimInfo};
use crate::error::MapError;
use crate::items::ItemLayerStore;
use crate::layers::MapLayerCache;
use crate::resolver::{fire_all, Completion, RegionResolver, ResolveCallback, ResolveContext};
use crate::scheduler::{GridBlockScheduler, RequestPolicy};
use crate::texture::{BoundImage, NoopBooster, TextureBooster};
use crate::tracking::{LocationTracker, TrackingState};
use crate::transport::RequestSink;

/// What applying one reply changed.
#[derive(Debug, Default)]
pub struct ReplyOutcome {
    /// Regions or items that were new or replaced.
    pub touched: usize,
    pub bounds_changed: bool,
    pub completions: Vec<Completion>,
}

/// The world map for one login session.
pub struct WorldMap {
    config: WorldMapConfig,
    directory: RegionDirectory,
    scheduler: GridBlockScheduler,
    resolver: RegionResolver,
    items: ItemLayerStore,
    layers: MapLayerCache,
    tracker: LocationTracker,
    booster: Box<dyn TextureBooster + Send>,
}

impl Default for WorldMap {
    fn default() -> Self {
        Self::new(WorldMapConfig::default())
    }
}

impl WorldMap {
    pub fn new(config: WorldMapConfig) -> Self {
        Self::with_booster(config, Box::new(NoopBooster))
    }

    pub fn with_booster(config: WorldMapConfig, booster: Box<dyn TextureBooster + Send>) -> Self {
        Self {
            scheduler: GridBlockScheduler::new(config.include_nonexistent, config.request_land_for_sale),
            layers: MapLayerCache::new(config.request_land_for_sale),
            directory: RegionDirectory::default(),
            resolver: RegionResolver::default(),
            items: ItemLayerStore::default(),
            tracker: LocationTracker::default(),
            config,
            booster,
        }
    }

    pub fn config(&self) -> &WorldMapConfig {
        &self.config
    }

    pub fn directory(&self) -> &RegionDirectory {
        &self.directory
    }

    pub fn scheduler(&self) -> &GridBlockScheduler {
        &self.scheduler
    }

    pub fn resolver(&self) -> &RegionResolver {
        &self.resolver
    }

    pub fn items(&self) -> &ItemLayerStore {
        &self.items
    }

    /// Mutable access for render-side selection marks.
    pub fn items_mut(&mut self) -> &mut ItemLayerStore {
        &mut self.items
    }

    pub fn layers(&self) -> &MapLayerCache {
        &self.layers
    }

    pub fn current_layer(&self) -> MapLayer {
        self.layers.current()
    }

    pub fn world_width(&self) -> u32 {
        self.directory.bounds().width()
    }

    pub fn world_height(&self) -> u32 {
        self.directory.bounds().height()
    }

    /// Applies a reply and fires any resolver callbacks it settles.
    pub fn handle_reply(&mut self, reply: MapReply, sink: &mut dyn RequestSink) -> Result<ReplyOutcome, MapError> {
        let mut outcome = self.apply_reply(reply, sink)?;
        fire_all(std::mem::take(&mut outcome.completions));
        Ok(outcome)
    }

    /// Applies a reply; settled callbacks are returned instead of fired.
    pub fn apply_reply(&mut self, reply: MapReply, sink: &mut dyn RequestSink) -> Result<ReplyOutcome, MapError> {
        match reply {
            MapReply::Layer { layer, tiles } => {
                let layer = parse_layer(layer)?;
                let bounds_changed =
                    self.layers
                        .on_layer_reply(layer, &tiles, self.directory.bounds_mut(), &mut *self.booster);
                Ok(ReplyOutcome {
                    touched: tiles.len(),
                    bounds_changed,
                    completions: Vec::new(),
                })
            }
            MapReply::Block { layer, regions } => {
                let layer = parse_layer(layer)?;
                let summary =
                    self.scheduler
                        .on_block_reply(&mut self.directory, layer, &regions, &mut *self.booster);
                let settled = self.resolver.satisfy(&regions);
                self.tracker.on_block_reply(&regions);

                let current = self.layers.current();
                for handle in settled.resolved {
                    if self.scheduler.block_state(current, handle.block()).is_none() {
                        self.scheduler
                            .request_block(handle.block(), current, RequestPolicy::SkipPending, sink);
                    }
                }

                Ok(ReplyOutcome {
                    touched: summary.touched,
                    bounds_changed: summary.bounds_changed,
                    completions: settled.completions,
                })
            }
            MapReply::Item {
                category,
                region,
                items,
            } => {
                let category = ItemCategory::try_from(category).map_err(|id| {
                    warn!("Dropping map item reply with unknown category {id}");
                    MapError::InvalidCategory(id)
                })?;
                let touched = self.items.replace(
                    category,
                    region,
                    &items,
                    &mut self.directory,
                    &self.config.event_time_format,
                );
                Ok(ReplyOutcome {
                    touched,
                    ..ReplyOutcome::default()
                })
            }
        }
    }

    /// Fetches metadata for every unrequested block in the viewport.
    pub fn request_visible(&mut self, min: UVec2, max: UVec2, sink: &mut dyn RequestSink) -> u32 {
        let layer = self.layers.current();
        self.scheduler
            .request_range_with(min, max, layer, RequestPolicy::SkipKnown, sink)
    }

    pub fn request_range(
        &mut self,
        min: UVec2,
        max: UVec2,
        layer: MapLayer,
        force: bool,
        sink: &mut dyn RequestSink,
    ) -> u32 {
        self.scheduler.request_range(min, max, layer, force, sink)
    }

    /// Returns the region if known; otherwise asks for its block.
    pub fn lookup_or_request(&mut self, handle: RegionHandle, sink: &mut dyn RequestSink) -> Option<&SimInfo> {
        if self.directory.lookup_covering(handle).is_none() && !self.directory.is_known_absent(handle) {
            let layer = self.layers.current();
            self.scheduler
                .request_block(handle.block(), layer, RequestPolicy::SkipPending, sink);
        }
        self.directory.lookup_covering(handle)
    }

    pub fn lookup_position_or_request(&mut self, pos: DVec3, sink: &mut dyn RequestSink) -> Option<&SimInfo> {
        self.lookup_or_request(RegionHandle::from_global(pos), sink)
    }

    /// Follows a position whose region may not be known yet. The state
    /// settles now if the region is cached, otherwise on its block reply.
    pub fn track_unknown_location(&mut self, pos: DVec3, sink: &mut dyn RequestSink) -> TrackingState {
        self.tracker.track(pos);
        let handle = RegionHandle::from_global(pos);
        if let Some(info) = self.directory.lookup_by_handle(handle) {
            let state = if info.access.is_down() {
                TrackingState::Invalid
            } else {
                TrackingState::Found
            };
            self.tracker.settle(state);
            return state;
        }
        if self.directory.is_known_absent(handle) {
            self.tracker.settle(TrackingState::Invalid);
            return TrackingState::Invalid;
        }
        let layer = self.layers.current();
        self.scheduler
            .request_block(handle.block(), layer, RequestPolicy::SkipPending, sink);
        TrackingState::Loading
    }

    pub fn clear_tracking(&mut self) {
        self.tracker.clear();
    }

    /// `None` when no position is tracked.
    pub fn tracking_state(&self) -> Option<TrackingState> {
        self.tracker.state()
    }

    pub fn tracked_position(&self) -> Option<DVec3> {
        self.tracker.position()
    }

    pub fn resolve_by_name(
        &mut self,
        name: &str,
        callback: Option<ResolveCallback>,
        context: ResolveContext,
        sink: &mut dyn RequestSink,
    ) {
        fire_all(self.resolve_by_name_deferred(name, callback, context, sink));
    }

    pub fn resolve_by_name_deferred(
        &mut self,
        name: &str,
        callback: Option<ResolveCallback>,
        context: ResolveContext,
        sink: &mut dyn RequestSink,
    ) -> Vec<Completion> {
        let layer = self.layers.current();
        self.resolver
            .resolve_by_name(name, callback, context, &self.directory, layer, sink)
    }

    pub fn resolve_by_handle(
        &mut self,
        handle: RegionHandle,
        callback: Option<ResolveCallback>,
        context: ResolveContext,
        sink: &mut dyn RequestSink,
    ) {
        fire_all(self.resolve_by_handle_deferred(handle, callback, context, sink));
    }

    pub fn resolve_by_handle_deferred(
        &mut self,
        handle: RegionHandle,
        callback: Option<ResolveCallback>,
        context: ResolveContext,
        sink: &mut dyn RequestSink,
    ) -> Vec<Completion> {
        let layer = self.layers.current();
        self.resolver
            .resolve_by_handle(handle, callback, context, &self.directory, layer, sink)
    }

    /// Switches layers, rebinds tiles cleared while the map was hidden and
    /// refreshes any empty item list.
    pub fn set_current_layer(&mut self, layer: MapLayer, request_if_needed: bool, sink: &mut dyn RequestSink) -> u32 {
        let mut sent = self.layers.set_current_layer(layer, request_if_needed, sink);
        self.layers.rebind_active(&mut *self.booster);
        sent += self.items.request_missing(layer, sink) as u32;
        sent
    }

    pub fn request_agent_locations(&mut self, handle: RegionHandle, sink: &mut dyn RequestSink) -> bool {
        let layer = self.layers.current();
        self.items
            .request(ItemCategory::AgentLocations, Some(handle), layer, sink)
    }

    /// Binds the region's tile image for `layer` and lends it out for one draw.
    pub fn bind_region_image(&mut self, handle: RegionHandle, layer: MapLayer) -> Option<&BoundImage> {
        let web_tiles = if self.config.web_tiles_enabled() {
            self.config.map_server_url.as_deref()
        } else {
            None
        };
        self.directory
            .bind_image(handle, layer, web_tiles, &mut *self.booster)
    }

    /// Drops held tile images, e.g. when the map is hidden. Metadata stays.
    pub fn clear_image_references(&mut self, layer: Option<MapLayer>) -> usize {
        let booster: &mut dyn TextureBooster = &mut *self.booster;
        self.directory.clear_image_references(layer, booster) + self.layers.clear_image_references(layer, booster)
    }

    /// Forgets one region and fetches its block again.
    pub fn force_update_region(&mut self, handle: RegionHandle, sink: &mut dyn RequestSink) -> u32 {
        if self.directory.remove(handle, &mut *self.booster) {
            info!("Forcing update of region {handle}");
        }
        let layer = self.layers.current();
        self.scheduler
            .request_block(handle.block(), layer, RequestPolicy::Force, sink)
    }

    /// Forgets every region, tile and item. Pending name/handle lookups stay.
    pub fn reset(&mut self) {
        let booster: &mut dyn TextureBooster = &mut *self.booster;
        self.directory.reset(booster);
        self.layers.reset(booster);
        self.scheduler.clear(None);
        self.items.reset();
        info!("World map reset");
    }

    pub fn dump(&self) {
        let layer = self.layers.current();
        info!(
            "World map: {} regions, {}x{} m, {} blocks pending, {} lookups pending, current layer {layer}",
            self.directory.len(),
            self.world_width(),
            self.world_height(),
            self.scheduler.pending_count(),
            self.resolver.pending_count(),
        );
        self.directory.dump(layer);
    }
}

fn parse_layer(id: u32) -> Result<MapLayer, MapError> {
    MapLayer::try_from(id).map_err(|id| {
        warn!("Invalid map image layer returned: {id}");
        MapError::InvalidLayer(id)
    })
}
