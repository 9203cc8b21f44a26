use std::fmt;

use rustc_hash::FxHashMap;
use tracing::{debug, info};
use uuid::Uuid;
use worldmap_shared::coords::RegionHandle;
use worldmap_shared::protocol::{MapLayer, MapRequest, RegionBlock};

use crate::directory::{RegionDirectory, SimInfo};
use crate::error::{ResolveError, ResolveTarget};
use crate::transport::RequestSink;

/// Longest region name accepted before a request is issued.
pub const MAX_REGION_NAME_LEN: usize = 128;

pub type ResolveOutcome = Result<ResolvedRegion, ResolveError>;
pub type ResolveCallback = Box<dyn FnOnce(ResolveOutcome) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRegion {
    pub handle: RegionHandle,
    pub url: String,
    /// Map image of the region on the layer that was current when it resolved.
    pub snapshot_id: Option<Uuid>,
    pub teleport: bool,
}

/// Opaque caller data carried through to the callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveContext {
    pub url: String,
    pub teleport: bool,
}

impl ResolveContext {
    pub fn new(url: impl Into<String>, teleport: bool) -> Self {
        Self {
            url: url.into(),
            teleport,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResolveState {
    Idle,
    Requested,
}

/// A settled callback, ready to fire.
pub struct Completion {
    callback: ResolveCallback,
    outcome: ResolveOutcome,
}

impl Completion {
    pub fn outcome(&self) -> &ResolveOutcome {
        &self.outcome
    }

    pub fn fire(self) {
        (self.callback)(self.outcome);
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

pub fn fire_all(completions: Vec<Completion>) {
    for completion in completions {
        completion.fire();
    }
}

struct Waiter {
    callback: Option<ResolveCallback>,
    context: ResolveContext,
}

struct Pending {
    target: ResolveTarget,
    waiters: Vec<Waiter>,
}

impl Pending {
    fn settle(self, found: Option<(RegionHandle, Option<Uuid>)>, out: &mut Vec<Completion>) {
        for waiter in self.waiters {
            let outcome = match found {
                Some((handle, snapshot_id)) => Ok(ResolvedRegion {
                    handle,
                    url: waiter.context.url,
                    snapshot_id,
                    teleport: waiter.context.teleport,
                }),
                None => Err(ResolveError::NotFound {
                    target: self.target.clone(),
                }),
            };
            if let Some(callback) = waiter.callback {
                out.push(Completion { callback, outcome });
            }
        }
    }
}

/// Result of matching one block reply against pending resolutions.
#[derive(Debug, Default)]
pub struct Settled {
    pub completions: Vec<Completion>,
    /// Handles that resolved successfully.
    pub resolved: Vec<RegionHandle>,
}

/// At most one request in flight per name (case-insensitive) or handle.
/// Settling returns [`Completion`]s for the owner to fire.
#[derive(Default)]
pub struct RegionResolver {
    by_name: FxHashMap<String, Pending>,
    by_handle: FxHashMap<RegionHandle, Pending>,
}

impl RegionResolver {
    pub fn resolve_by_name(
        &mut self,
        name: &str,
        callback: Option<ResolveCallback>,
        context: ResolveContext,
        directory: &RegionDirectory,
        layer: MapLayer,
        sink: &mut dyn RequestSink,
    ) -> Vec<Completion> {
        let name = match validate_name(name) {
            Ok(name) => name,
            Err(reason) => {
                debug!("Rejecting region name {name:?}: {reason}");
                let outcome = Err(ResolveError::Unresolvable {
                    name: name.to_string(),
                    reason,
                });
                return callback
                    .map(|callback| vec![Completion { callback, outcome }])
                    .unwrap_or_default();
            }
        };

        if let Some(info) = directory.lookup_by_name(name) {
            return immediate(info, layer, callback, context);
        }

        let key = name.to_lowercase();
        let waiter = Waiter { callback, context };
        if let Some(pending) = self.by_name.get_mut(&key) {
            pending.waiters.push(waiter);
            return Vec::new();
        }

        info!("Requesting region by name: {name}");
        sink.send(MapRequest::NameRegion {
            layer,
            name: name.to_string(),
        });
        self.by_name.insert(
            key,
            Pending {
                target: ResolveTarget::Name(name.to_string()),
                waiters: vec![waiter],
            },
        );
        Vec::new()
    }

    pub fn resolve_by_handle(
        &mut self,
        handle: RegionHandle,
        callback: Option<ResolveCallback>,
        context: ResolveContext,
        directory: &RegionDirectory,
        layer: MapLayer,
        sink: &mut dyn RequestSink,
    ) -> Vec<Completion> {
        if let Some(info) = directory.lookup_by_handle(handle) {
            return immediate(info, layer, callback, context);
        }
        if directory.is_known_absent(handle) {
            let outcome = Err(ResolveError::NotFound {
                target: ResolveTarget::Handle(handle),
            });
            return callback
                .map(|callback| vec![Completion { callback, outcome }])
                .unwrap_or_default();
        }

        let waiter = Waiter { callback, context };
        if let Some(pending) = self.by_handle.get_mut(&handle) {
            pending.waiters.push(waiter);
            return Vec::new();
        }

        info!("Requesting region by handle: {handle}");
        sink.send(MapRequest::HandleRegion { layer, handle });
        self.by_handle.insert(
            handle,
            Pending {
                target: ResolveTarget::Handle(handle),
                waiters: vec![waiter],
            },
        );
        Vec::new()
    }

    /// Settles every pending entry the listed regions answer.
    pub fn satisfy(&mut self, regions: &[RegionBlock]) -> Settled {
        let mut settled = Settled::default();
        if self.by_name.is_empty() && self.by_handle.is_empty() {
            return settled;
        }

        for region in regions {
            let nonexistent = region.access.is_nonexistent();
            if region.name.is_empty() && !nonexistent {
                continue;
            }

            let handle = region.handle();
            let found = (!nonexistent).then(|| (handle, Some(region.image_id).filter(|id| !id.is_nil())));

            let by_handle = self.by_handle.remove(&handle);
            let by_name = if region.name.is_empty() {
                None
            } else {
                self.by_name.remove(&region.name.to_lowercase())
            };

            for pending in [by_handle, by_name].into_iter().flatten() {
                debug!("Settled {:?} -> {:?}", pending.target, found.map(|(h, _)| h));
                if found.is_some() && !settled.resolved.contains(&handle) {
                    settled.resolved.push(handle);
                }
                pending.settle(found, &mut settled.completions);
            }
        }
        settled
    }

    pub fn name_state(&self, name: &str) -> ResolveState {
        if self.by_name.contains_key(&name.trim().to_lowercase()) {
            ResolveState::Requested
        } else {
            ResolveState::Idle
        }
    }

    pub fn handle_state(&self, handle: RegionHandle) -> ResolveState {
        if self.by_handle.contains_key(&handle) {
            ResolveState::Requested
        } else {
            ResolveState::Idle
        }
    }

    pub fn is_pending_name(&self, name: &str) -> bool {
        self.name_state(name) == ResolveState::Requested
    }

    pub fn is_pending_handle(&self, handle: RegionHandle) -> bool {
        self.handle_state(handle) == ResolveState::Requested
    }

    pub fn pending_names(&self) -> Vec<&str> {
        self.by_name
            .values()
            .filter_map(|pending| match &pending.target {
                ResolveTarget::Name(name) => Some(name.as_str()),
                ResolveTarget::Handle(_) => None,
            })
            .collect()
    }

    pub fn pending_handles(&self) -> Vec<RegionHandle> {
        self.by_handle.keys().copied().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.by_name.len() + self.by_handle.len()
    }
}

fn immediate(
    info: &SimInfo,
    layer: MapLayer,
    callback: Option<ResolveCallback>,
    context: ResolveContext,
) -> Vec<Completion> {
    let Some(callback) = callback else {
        return Vec::new();
    };
    let outcome = Ok(ResolvedRegion {
        handle: info.handle,
        url: context.url,
        snapshot_id: info.image_id(layer),
        teleport: context.teleport,
    });
    vec![Completion { callback, outcome }]
}

fn validate_name(name: &str) -> Result<&str, &'static str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("empty region name");
    }
    if trimmed.len() > MAX_REGION_NAME_LEN {
        return Err("region name too long");
    }
    if trimmed.chars().any(char::is_control) {
        return Err("control character in region name");
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use uuid::Uuid;
    use worldmap_shared::coords::RegionHandle;
    use worldmap_shared::protocol::{MapLayer, MapRequest, RegionBlock, SimAccess};

    use super::{
        fire_all, RegionResolver, ResolveCallback, ResolveContext, ResolveOutcome, ResolveState,
        ResolvedRegion,
    };
    use crate::directory::{RegionDirectory, RegionUpdate};
    use crate::error::{ResolveError, ResolveTarget};
    use crate::texture::NoopBooster;

    type Log = Arc<Mutex<Vec<(usize, ResolveOutcome)>>>;

    fn recorder(log: &Log, id: usize) -> Option<ResolveCallback> {
        let log = Arc::clone(log);
        Some(Box::new(move |outcome| {
            log.lock().expect("log lock").push((id, outcome));
        }))
    }

    fn block(grid_x: u16, grid_y: u16, name: &str, access: SimAccess, image: u128) -> RegionBlock {
        RegionBlock {
            grid_x,
            grid_y,
            name: name.to_string(),
            access,
            region_flags: 0,
            image_id: Uuid::from_u128(image),
            size: None,
        }
    }

    #[test]
    fn concurrent_name_lookups_share_one_request() {
        let mut resolver = RegionResolver::default();
        let dir = RegionDirectory::default();
        let mut sent: Vec<MapRequest> = Vec::new();
        let log: Log = Arc::default();

        for id in 0..2 {
            let immediate = resolver.resolve_by_name(
                "Alpha",
                recorder(&log, id),
                ResolveContext::default(),
                &dir,
                MapLayer::Objects,
                &mut sent,
            );
            assert!(immediate.is_empty());
        }
        assert_eq!(
            sent,
            vec![MapRequest::NameRegion {
                layer: MapLayer::Objects,
                name: "Alpha".to_string()
            }]
        );
        assert_eq!(resolver.name_state("alpha"), ResolveState::Requested);

        let settled = resolver.satisfy(&[block(1000, 1000, "ALPHA", SimAccess::PG, 3)]);
        assert_eq!(settled.resolved, vec![RegionHandle::from_grid(1000, 1000)]);
        fire_all(settled.completions);

        let log = log.lock().expect("log lock");
        assert_eq!(log.len(), 2);
        for (_, outcome) in log.iter() {
            let resolved = outcome.as_ref().expect("resolved");
            assert_eq!(resolved.handle, RegionHandle::from_grid(1000, 1000));
            assert_eq!(resolved.snapshot_id, Some(Uuid::from_u128(3)));
        }
        assert_eq!(resolver.name_state("Alpha"), ResolveState::Idle);
        assert_eq!(resolver.pending_count(), 0);
    }

    #[test]
    fn cached_name_fires_synchronously_without_request() {
        let mut resolver = RegionResolver::default();
        let mut dir = RegionDirectory::default();
        dir.upsert(
            RegionUpdate::from_block(MapLayer::Objects, &block(2, 2, "Beta", SimAccess::PG, 8)),
            &mut NoopBooster,
        );
        let mut sent: Vec<MapRequest> = Vec::new();
        let log: Log = Arc::default();

        let completions = resolver.resolve_by_name(
            "beta",
            recorder(&log, 0),
            ResolveContext::new("secondlife:///app/teleport/Beta/1/2/3", true),
            &dir,
            MapLayer::Objects,
            &mut sent,
        );
        assert_eq!(completions.len(), 1);
        fire_all(completions);
        assert!(sent.is_empty());

        let log = log.lock().expect("log lock");
        assert_eq!(
            log[0].1,
            Ok(ResolvedRegion {
                handle: RegionHandle::from_grid(2, 2),
                url: "secondlife:///app/teleport/Beta/1/2/3".to_string(),
                snapshot_id: Some(Uuid::from_u128(8)),
                teleport: true,
            })
        );
    }

    #[test]
    fn malformed_names_fail_before_any_request() {
        let mut resolver = RegionResolver::default();
        let dir = RegionDirectory::default();
        let mut sent: Vec<MapRequest> = Vec::new();
        let log: Log = Arc::default();

        for (id, name) in ["   ", "bad\u{7}name"].into_iter().enumerate() {
            fire_all(resolver.resolve_by_name(
                name,
                recorder(&log, id),
                ResolveContext::default(),
                &dir,
                MapLayer::Objects,
                &mut sent,
            ));
        }
        let long = "x".repeat(super::MAX_REGION_NAME_LEN + 1);
        fire_all(resolver.resolve_by_name(&long, recorder(&log, 2), ResolveContext::default(), &dir, MapLayer::Objects, &mut sent));

        assert!(sent.is_empty());
        let log = log.lock().expect("log lock");
        assert_eq!(log.len(), 3);
        assert!(log
            .iter()
            .all(|(_, outcome)| matches!(outcome, Err(ResolveError::Unresolvable { .. }))));
    }

    #[test]
    fn handle_lookup_carries_url_and_teleport() {
        let mut resolver = RegionResolver::default();
        let dir = RegionDirectory::default();
        let mut sent: Vec<MapRequest> = Vec::new();
        let log: Log = Arc::default();
        let handle = RegionHandle::from_grid(1000, 1001);

        fire_all(resolver.resolve_by_handle(
            handle,
            recorder(&log, 0),
            ResolveContext::new("region/100/100/25", true),
            &dir,
            MapLayer::Objects,
            &mut sent,
        ));
        fire_all(resolver.resolve_by_handle(
            handle,
            recorder(&log, 1),
            ResolveContext::new("other", false),
            &dir,
            MapLayer::Objects,
            &mut sent,
        ));
        assert_eq!(
            sent,
            vec![MapRequest::HandleRegion {
                layer: MapLayer::Objects,
                handle
            }]
        );
        assert_eq!(resolver.pending_handles(), vec![handle]);

        fire_all(resolver.satisfy(&[block(1000, 1001, "Gamma", SimAccess::MATURE, 4)]).completions);
        let log = log.lock().expect("log lock");
        assert_eq!(log.len(), 2);
        let first = log.iter().find(|(id, _)| *id == 0).expect("first caller");
        assert_eq!(
            first.1,
            Ok(ResolvedRegion {
                handle,
                url: "region/100/100/25".to_string(),
                snapshot_id: Some(Uuid::from_u128(4)),
                teleport: true,
            })
        );
        let second = log.iter().find(|(id, _)| *id == 1).expect("second caller");
        assert!(matches!(&second.1, Ok(r) if !r.teleport && r.url == "other"));
    }

    #[test]
    fn nonexistent_reply_fails_every_waiter_once() {
        let mut resolver = RegionResolver::default();
        let dir = RegionDirectory::default();
        let mut sent: Vec<MapRequest> = Vec::new();
        let log: Log = Arc::default();
        let handle = RegionHandle::from_grid(9, 9);

        fire_all(resolver.resolve_by_name("Nowhere", recorder(&log, 0), ResolveContext::default(), &dir, MapLayer::Objects, &mut sent));
        fire_all(resolver.resolve_by_handle(handle, recorder(&log, 1), ResolveContext::default(), &dir, MapLayer::Objects, &mut sent));

        let settled = resolver.satisfy(&[
            block(0, 0, "nowhere", SimAccess::NONEXISTENT, 0),
            block(9, 9, "", SimAccess::NONEXISTENT, 0),
        ]);
        assert!(settled.resolved.is_empty());
        fire_all(settled.completions);
        // A second identical reply must not fire anything again.
        assert!(resolver
            .satisfy(&[block(9, 9, "", SimAccess::NONEXISTENT, 0)])
            .completions
            .is_empty());

        let log = log.lock().expect("log lock");
        assert_eq!(log.len(), 2);
        assert!(log.contains(&(
            0,
            Err(ResolveError::NotFound {
                target: ResolveTarget::Name("Nowhere".to_string())
            })
        )));
        assert!(log.contains(&(
            1,
            Err(ResolveError::NotFound {
                target: ResolveTarget::Handle(handle)
            })
        )));
    }

    #[test]
    fn known_absent_handle_fails_immediately() {
        let mut resolver = RegionResolver::default();
        let mut dir = RegionDirectory::default();
        let handle = RegionHandle::from_grid(4, 4);
        dir.mark_nonexistent(handle);
        let mut sent: Vec<MapRequest> = Vec::new();
        let log: Log = Arc::default();

        fire_all(resolver.resolve_by_handle(handle, recorder(&log, 0), ResolveContext::default(), &dir, MapLayer::Terrain, &mut sent));
        assert!(sent.is_empty());
        assert_eq!(log.lock().expect("log lock").len(), 1);
    }

    #[test]
    fn callback_less_requests_still_dedup() {
        let mut resolver = RegionResolver::default();
        let dir = RegionDirectory::default();
        let mut sent: Vec<MapRequest> = Vec::new();
        resolver.resolve_by_name("Delta", None, ResolveContext::default(), &dir, MapLayer::Objects, &mut sent);
        resolver.resolve_by_name(" delta ", None, ResolveContext::default(), &dir, MapLayer::Objects, &mut sent);
        assert_eq!(sent.len(), 1);
        assert_eq!(resolver.pending_names(), vec!["Delta"]);

        let settled = resolver.satisfy(&[block(3, 3, "Delta", SimAccess::PG, 1)]);
        assert!(settled.completions.is_empty());
        assert_eq!(settled.resolved, vec![RegionHandle::from_grid(3, 3)]);
    }
}
