use uuid::Uuid;
use worldmap_shared::coords::RegionHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TileSource {
    Asset(Uuid),
    Url(String),
}

impl TileSource {
    /// Web tile for one region of the objects layer.
    pub fn objects_tile(base_url: &str, handle: RegionHandle) -> Self {
        let grid = handle.grid();
        TileSource::Url(format!("{base_url}map-1-{}-{}-objects.jpg", grid.x, grid.y))
    }
}

/// A tile image held by the map. Consumers only ever see `&BoundImage`.
#[derive(Debug, PartialEq, Eq)]
pub struct BoundImage {
    source: TileSource,
}

impl BoundImage {
    pub fn source(&self) -> &TileSource {
        &self.source
    }

    pub fn asset_id(&self) -> Option<Uuid> {
        match &self.source {
            TileSource::Asset(id) => Some(*id),
            TileSource::Url(_) => None,
        }
    }
}

pub trait TextureBooster {
    fn acquire(&mut self, source: &TileSource);
    fn release(&mut self, source: &TileSource);
}

#[derive(Debug, Default)]
pub struct NoopBooster;

impl TextureBooster for NoopBooster {
    fn acquire(&mut self, _source: &TileSource) {}
    fn release(&mut self, _source: &TileSource) {}
}

pub fn bind(source: TileSource, booster: &mut dyn TextureBooster) -> BoundImage {
    booster.acquire(&source);
    BoundImage { source }
}

pub fn unbind(image: BoundImage, booster: &mut dyn TextureBooster) {
    booster.release(&image.source);
}

/// Records acquire/release calls; used by tests across the crate.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingBooster {
    pub acquired: Vec<TileSource>,
    pub released: Vec<TileSource>,
}

#[cfg(test)]
impl TextureBooster for RecordingBooster {
    fn acquire(&mut self, source: &TileSource) {
        self.acquired.push(source.clone());
    }

    fn release(&mut self, source: &TileSource) {
        self.released.push(source.clone());
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;
    use worldmap_shared::coords::RegionHandle;

    use super::{bind, unbind, RecordingBooster, TileSource};

    #[test]
    fn objects_tile_url_uses_grid_coordinates() {
        let source = TileSource::objects_tile("https://tiles.example/", RegionHandle::from_grid(1000, 1001));
        assert_eq!(
            source,
            TileSource::Url("https://tiles.example/map-1-1000-1001-objects.jpg".to_string())
        );
    }

    #[test]
    fn bind_and_unbind_drive_the_booster() {
        let mut booster = RecordingBooster::default();
        let image = bind(TileSource::Asset(Uuid::from_u128(9)), &mut booster);
        assert_eq!(image.asset_id(), Some(Uuid::from_u128(9)));
        unbind(image, &mut booster);
        assert_eq!(booster.acquired, booster.released);
        assert_eq!(booster.acquired.len(), 1);
    }
}
