use std::sync::{Arc, Mutex, MutexGuard};

use glam::UVec2;
use tracing::warn;
use worldmap_shared::coords::RegionHandle;
use worldmap_shared::protocol::{MapLayer, MapReply};

use crate::error::MapError;
use crate::resolver::{fire_all, ResolveCallback, ResolveContext};
use crate::transport::{decode_reply, RequestSink};
use crate::world_map::WorldMap;

/// Thread-safe handle to a [`WorldMap`]. Resolver callbacks run after the
/// lock is dropped, so they may call back into the map.
#[derive(Clone)]
pub struct SharedWorldMap {
    inner: Arc<Mutex<WorldMap>>,
}

impl SharedWorldMap {
    pub fn new(map: WorldMap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }

    /// Locks the map for a batch of reads. Do not hold the guard across a
    /// call to another method of this handle.
    pub fn lock(&self) -> MutexGuard<'_, WorldMap> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("World map lock was poisoned; continuing with inner state");
                poisoned.into_inner()
            }
        }
    }

    /// Applies a reply. Returns how many regions or items it touched.
    pub fn handle_reply(&self, reply: MapReply, sink: &mut dyn RequestSink) -> Result<usize, MapError> {
        let outcome = self.lock().apply_reply(reply, sink)?;
        fire_all(outcome.completions);
        Ok(outcome.touched)
    }

    pub fn handle_encoded_reply(&self, data: &[u8], sink: &mut dyn RequestSink) -> Result<usize, MapError> {
        self.handle_reply(decode_reply(data)?, sink)
    }

    pub fn resolve_by_name(
        &self,
        name: &str,
        callback: Option<ResolveCallback>,
        context: ResolveContext,
        sink: &mut dyn RequestSink,
    ) {
        let completions = self.lock().resolve_by_name_deferred(name, callback, context, sink);
        fire_all(completions);
    }

    pub fn resolve_by_handle(
        &self,
        handle: RegionHandle,
        callback: Option<ResolveCallback>,
        context: ResolveContext,
        sink: &mut dyn RequestSink,
    ) {
        let completions = self
            .lock()
            .resolve_by_handle_deferred(handle, callback, context, sink);
        fire_all(completions);
    }

    pub fn request_visible(&self, min: UVec2, max: UVec2, sink: &mut dyn RequestSink) -> u32 {
        self.lock().request_visible(min, max, sink)
    }

    pub fn set_current_layer(&self, layer: MapLayer, request_if_needed: bool, sink: &mut dyn RequestSink) -> u32 {
        self.lock().set_current_layer(layer, request_if_needed, sink)
    }

    pub fn clear_image_references(&self, layer: Option<MapLayer>) -> usize {
        self.lock().clear_image_references(layer)
    }

    pub fn reset(&self) {
        self.lock().reset();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use uuid::Uuid;
    use worldmap_shared::coords::RegionHandle;
    use worldmap_shared::protocol::{self, MapLayer, MapReply, MapRequest, RegionBlock, SimAccess};

    use super::SharedWorldMap;
    use crate::config::WorldMapConfig;
    use crate::resolver::ResolveContext;
    use crate::transport::request_queue;
    use crate::world_map::WorldMap;

    fn alpha_reply() -> MapReply {
        MapReply::Block {
            layer: MapLayer::Objects.wire_id(),
            regions: vec![RegionBlock {
                grid_x: 1000,
                grid_y: 1000,
                name: "Alpha".to_string(),
                access: SimAccess::PG,
                region_flags: 0,
                image_id: Uuid::from_u128(1),
                size: None,
            }],
        }
    }

    #[test]
    fn callbacks_can_reenter_the_map() {
        let map = SharedWorldMap::new(WorldMap::new(WorldMapConfig::default()));
        let mut sent: Vec<MapRequest> = Vec::new();
        let seen = Arc::new(Mutex::new(None));

        let reentrant = map.clone();
        let seen_in_cb = Arc::clone(&seen);
        map.resolve_by_name(
            "alpha",
            Some(Box::new(move |outcome| {
                let handle = outcome.map(|resolved| resolved.handle).ok();
                let name = handle.and_then(|handle| {
                    reentrant
                        .lock()
                        .directory()
                        .lookup_by_handle(handle)
                        .map(|info| info.name.clone())
                });
                *seen_in_cb.lock().expect("seen lock") = name;
            })),
            ResolveContext::default(),
            &mut sent,
        );

        map.handle_reply(alpha_reply(), &mut sent).expect("block reply");
        assert_eq!(seen.lock().expect("seen lock").as_deref(), Some("Alpha"));
    }

    #[test]
    fn concurrent_resolvers_share_one_request() {
        let map = SharedWorldMap::new(WorldMap::new(WorldMapConfig::default()));
        let (queue, receiver) = request_queue();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let map = map.clone();
                let mut queue = queue.clone();
                let hits = Arc::clone(&hits);
                thread::spawn(move || {
                    map.resolve_by_name(
                        "Alpha",
                        Some(Box::new(move |outcome| {
                            hits.lock().expect("hits lock").push(outcome.map(|r| r.handle));
                        })),
                        ResolveContext::default(),
                        &mut queue,
                    );
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker thread");
        }

        let requests = receiver.drain();
        assert_eq!(
            requests
                .iter()
                .filter(|r| matches!(r, MapRequest::NameRegion { .. }))
                .count(),
            1
        );

        let encoded = protocol::encode(&alpha_reply()).expect("encode reply");
        let mut sink = queue;
        assert_eq!(map.handle_encoded_reply(&encoded, &mut sink).expect("reply"), 1);

        let hits = hits.lock().expect("hits lock");
        assert_eq!(hits.len(), 4);
        assert!(hits
            .iter()
            .all(|hit| *hit == Ok(RegionHandle::from_grid(1000, 1000))));
    }

    #[test]
    fn reset_through_the_handle() {
        let map = SharedWorldMap::new(WorldMap::default());
        let mut sent: Vec<MapRequest> = Vec::new();
        map.handle_reply(alpha_reply(), &mut sent).expect("block reply");
        assert_eq!(map.lock().directory().len(), 1);
        map.reset();
        assert!(map.lock().directory().is_empty());
    }
}
