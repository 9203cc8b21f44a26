use tracing::{debug, info};
use uuid::Uuid;
use worldmap_shared::coords::TileExtents;
use worldmap_shared::protocol::{LayerTile, MapLayer, MapRequest};

use crate::bounds::BoundsTracker;
use crate::texture::{bind, unbind, BoundImage, TextureBooster, TileSource};
use crate::transport::RequestSink;

/// One composite tile. Only drawn once its image is bound.
#[derive(Debug)]
pub struct WorldMapLayer {
    pub extents: TileExtents,
    pub image_id: Uuid,
    image: Option<BoundImage>,
}

impl WorldMapLayer {
    pub fn is_defined(&self) -> bool {
        self.image.is_some()
    }

    pub fn image(&self) -> Option<&BoundImage> {
        self.image.as_ref()
    }

    fn bind(&mut self, booster: &mut dyn TextureBooster) -> bool {
        if self.image.is_some() || self.image_id.is_nil() {
            return false;
        }
        self.image = Some(bind(TileSource::Asset(self.image_id), booster));
        true
    }

    fn release(&mut self, booster: &mut dyn TextureBooster) -> bool {
        match self.image.take() {
            Some(image) => {
                unbind(image, booster);
                true
            }
            None => false,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LayerState {
    #[default]
    Idle,
    Requested,
    Loaded,
}

#[derive(Debug)]
pub struct MapLayerCache {
    tiles: [Vec<WorldMapLayer>; MapLayer::COUNT],
    states: [LayerState; MapLayer::COUNT],
    current: MapLayer,
    mirror_land_for_sale: bool,
}

impl MapLayerCache {
    pub fn new(mirror_land_for_sale: bool) -> Self {
        Self {
            tiles: Default::default(),
            states: [LayerState::Idle; MapLayer::COUNT],
            current: MapLayer::Objects,
            mirror_land_for_sale,
        }
    }

    pub fn current(&self) -> MapLayer {
        self.current
    }

    pub fn state(&self, layer: MapLayer) -> LayerState {
        self.states[layer.index()]
    }

    /// Makes `layer` the active one and asks for its tile list if it has none.
    /// `force` refreshes a layer that already loaded. Returns the number of
    /// layer requests sent.
    pub fn set_current_layer(&mut self, layer: MapLayer, force: bool, sink: &mut dyn RequestSink) -> u32 {
        if self.current != layer {
            info!("Switching world map to the {layer} layer");
            self.current = layer;
        }

        let mut sent = 0;
        if self.request(layer, force, sink) {
            sent += 1;
        }
        if self.mirror_land_for_sale && layer != MapLayer::LandForSale && self.request(MapLayer::LandForSale, force, sink) {
            sent += 1;
        }
        sent
    }

    fn request(&mut self, layer: MapLayer, force: bool, sink: &mut dyn RequestSink) -> bool {
        let state = &mut self.states[layer.index()];
        let wanted = match *state {
            LayerState::Idle => true,
            LayerState::Requested => false,
            LayerState::Loaded => force,
        };
        if !wanted {
            return false;
        }
        *state = LayerState::Requested;
        info!("Sending map layer request for {layer}");
        sink.send(MapRequest::Layer { layer });
        true
    }

    /// Replaces the tile list for `layer`. Returns true if the world bounds grew.
    pub fn on_layer_reply(
        &mut self,
        layer: MapLayer,
        tiles: &[LayerTile],
        bounds: &mut BoundsTracker,
        booster: &mut dyn TextureBooster,
    ) -> bool {
        let list = &mut self.tiles[layer.index()];
        for old in list.iter_mut() {
            old.release(booster);
        }
        list.clear();

        let mut bounds_changed = false;
        for tile in tiles {
            let (min, max) = tile.extents.meters();
            bounds_changed |= bounds.extend(min.x, min.y, max.x, max.y);

            let mut entry = WorldMapLayer {
                extents: tile.extents,
                image_id: tile.image_id,
                image: None,
            };
            if !entry.bind(booster) {
                debug!("Layer {layer} tile without image at ({}, {})", tile.extents.left, tile.extents.bottom);
            }
            list.push(entry);
        }

        self.states[layer.index()] = LayerState::Loaded;
        info!("Loaded {} {layer} tiles", list.len());
        bounds_changed
    }

    pub fn tiles(&self, layer: MapLayer) -> &[WorldMapLayer] {
        &self.tiles[layer.index()]
    }

    /// Tiles ready to draw; undefined ones are skipped.
    pub fn defined_tiles(&self, layer: MapLayer) -> impl Iterator<Item = &WorldMapLayer> + '_ {
        self.tiles[layer.index()].iter().filter(|tile| tile.is_defined())
    }

    pub fn clear_image_references(&mut self, layer: Option<MapLayer>, booster: &mut dyn TextureBooster) -> usize {
        let mut released = 0;
        for candidate in MapLayer::ALL {
            if layer.map_or(true, |l| l == candidate) {
                for tile in &mut self.tiles[candidate.index()] {
                    released += usize::from(tile.release(booster));
                }
            }
        }
        released
    }

    /// Binds again the tiles of `layer` whose images were cleared.
    pub fn rebind_images(&mut self, layer: MapLayer, booster: &mut dyn TextureBooster) -> usize {
        self.tiles[layer.index()]
            .iter_mut()
            .map(|tile| usize::from(tile.bind(booster)))
            .sum()
    }

    /// Rebinds the current layer and its mirrored overlay after a clear.
    pub fn rebind_active(&mut self, booster: &mut dyn TextureBooster) -> usize {
        let mut rebound = self.rebind_images(self.current, booster);
        if self.mirror_land_for_sale && self.current != MapLayer::LandForSale {
            rebound += self.rebind_images(MapLayer::LandForSale, booster);
        }
        if rebound > 0 {
            debug!("Rebound {rebound} {} tiles", self.current);
        }
        rebound
    }

    pub fn reset(&mut self, booster: &mut dyn TextureBooster) {
        self.clear_image_references(None, booster);
        for list in &mut self.tiles {
            list.clear();
        }
        self.states = [LayerState::Idle; MapLayer::COUNT];
    }
}
