use std::fmt::Write as _;
use std::time::Instant;

use chrono::DateTime;
use glam::DVec3;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};
use uuid::Uuid;
use worldmap_shared::coords::RegionHandle;
use worldmap_shared::protocol::{ItemBlock, ItemCategory, MapLayer, MapRequest};

use crate::directory::RegionDirectory;
use crate::transport::RequestSink;

/// A point of interest shown on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemInfo {
    pub pos_global: DVec3,
    pub id: Uuid,
    pub name: String,
    pub tooltip: String,
    /// Render-side selection mark. Lost when the list is replaced.
    pub selected: bool,
    pub extra: i32,
    pub extra2: i32,
    pub region_handle: RegionHandle,
    pub color: Option<[u8; 4]>,
}

impl ItemInfo {
    fn from_block(block: &ItemBlock) -> Self {
        let pos_global = DVec3::new(f64::from(block.x), f64::from(block.y), 0.0);
        Self {
            pos_global,
            id: block.id,
            name: block.name.clone(),
            tooltip: String::new(),
            selected: false,
            extra: block.extra,
            extra2: block.extra2,
            region_handle: RegionHandle::from_global(pos_global),
            color: None,
        }
    }
}

/// The item lists a consumer can iterate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Telehubs,
    Infohubs,
    PgEvents,
    MatureEvents,
    AdultEvents,
    LandForSale,
    LandForSaleAdult,
}

impl ItemKind {
    pub const ALL: [ItemKind; 7] = [
        ItemKind::Telehubs,
        ItemKind::Infohubs,
        ItemKind::PgEvents,
        ItemKind::MatureEvents,
        ItemKind::AdultEvents,
        ItemKind::LandForSale,
        ItemKind::LandForSaleAdult,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Categories that populate the global lists, in the order they are refreshed.
pub const LIST_CATEGORIES: [ItemCategory; 6] = [
    ItemCategory::Telehub,
    ItemCategory::PgEvent,
    ItemCategory::MatureEvent,
    ItemCategory::AdultEvent,
    ItemCategory::LandForSale,
    ItemCategory::LandForSaleAdult,
];

#[derive(Debug, Default)]
pub struct ItemLayerStore {
    lists: [Vec<ItemInfo>; ItemKind::ALL.len()],
    agent_locations: FxHashMap<RegionHandle, Vec<ItemInfo>>,
    outstanding: FxHashSet<(ItemCategory, Option<RegionHandle>)>,
}

impl ItemLayerStore {
    /// Asks for one category unless the same request is still unanswered.
    pub fn request(
        &mut self,
        category: ItemCategory,
        region: Option<RegionHandle>,
        layer: MapLayer,
        sink: &mut dyn RequestSink,
    ) -> bool {
        if !self.outstanding.insert((category, region)) {
            return false;
        }
        debug!("Requesting map items {category:?} region {region:?}");
        sink.send(MapRequest::Item {
            layer,
            category,
            region,
        });
        true
    }

    /// Requests every global category whose list is currently empty.
    pub fn request_missing(&mut self, layer: MapLayer, sink: &mut dyn RequestSink) -> usize {
        let mut sent = 0;
        for category in LIST_CATEGORIES {
            let missing = match category {
                ItemCategory::Telehub => {
                    self.is_empty(ItemKind::Telehubs) || self.is_empty(ItemKind::Infohubs)
                }
                other => kind_for(other).is_some_and(|kind| self.is_empty(kind)),
            };
            if missing && self.request(category, None, layer, sink) {
                sent += 1;
            }
        }
        sent
    }

    pub fn is_outstanding(&self, category: ItemCategory, region: Option<RegionHandle>) -> bool {
        self.outstanding.contains(&(category, region))
    }

    /// Replaces the lists fed by `category` with the contents of one reply.
    /// Returns how many items were stored.
    pub fn replace(
        &mut self,
        category: ItemCategory,
        region: Option<RegionHandle>,
        items: &[ItemBlock],
        directory: &mut RegionDirectory,
        time_format: &str,
    ) -> usize {
        self.outstanding.remove(&(category, region));

        match category {
            ItemCategory::Telehub => {
                let (infohubs, telehubs): (Vec<_>, Vec<_>) = items
                    .iter()
                    .map(|block| {
                        let mut item = ItemInfo::from_block(block);
                        item.color = Some(telehub_color(item.region_handle));
                        item
                    })
                    .partition(|item| item.extra2 != 0);
                let stored = telehubs.len() + infohubs.len();
                self.lists[ItemKind::Telehubs.index()] = telehubs;
                self.lists[ItemKind::Infohubs.index()] = infohubs;
                stored
            }
            ItemCategory::PgEvent | ItemCategory::MatureEvent | ItemCategory::AdultEvent => {
                let events: Vec<_> = items
                    .iter()
                    .map(|block| {
                        let mut item = ItemInfo::from_block(block);
                        item.tooltip = event_timestamp(block.extra, time_format);
                        item.pos_global.z = f64::from(block.extra2);
                        item
                    })
                    .collect();
                self.store(category, events)
            }
            ItemCategory::LandForSale | ItemCategory::LandForSaleAdult => {
                let parcels: Vec<_> = items
                    .iter()
                    .map(|block| {
                        let mut item = ItemInfo::from_block(block);
                        item.tooltip = format!("{} m2 L${}", block.extra, block.extra2);
                        item
                    })
                    .collect();
                self.store(category, parcels)
            }
            ItemCategory::AgentLocations => self.replace_agent_locations(region, items, directory),
            ItemCategory::Classified => 0,
        }
    }

    fn store(&mut self, category: ItemCategory, items: Vec<ItemInfo>) -> usize {
        let Some(kind) = kind_for(category) else {
            return 0;
        };
        let stored = items.len();
        self.lists[kind.index()] = items;
        stored
    }

    fn replace_agent_locations(
        &mut self,
        region: Option<RegionHandle>,
        items: &[ItemBlock],
        directory: &mut RegionDirectory,
    ) -> usize {
        let mut fresh: FxHashMap<RegionHandle, Vec<ItemInfo>> = FxHashMap::default();
        // An empty reply for a known region still means "nobody there".
        if let Some(handle) = region.filter(|handle| directory.lookup_by_handle(*handle).is_some()) {
            fresh.insert(handle, Vec::new());
        }
        for block in items {
            let item = ItemInfo::from_block(block);
            let Some(info) = directory.lookup_by_handle_mut(item.region_handle) else {
                info!(
                    "Sim info missing for agent location at {}, {}",
                    item.pos_global.x, item.pos_global.y
                );
                continue;
            };
            info.agents_update_time = Some(Instant::now());
            let list = fresh.entry(item.region_handle).or_default();
            if item.extra > 0 {
                list.push(item);
            }
        }

        let stored = fresh.values().map(Vec::len).sum();
        for (handle, list) in fresh {
            self.agent_locations.insert(handle, list);
        }
        stored
    }

    pub fn items(&self, kind: ItemKind) -> &[ItemInfo] {
        &self.lists[kind.index()]
    }

    pub fn items_mut(&mut self, kind: ItemKind) -> &mut [ItemInfo] {
        &mut self.lists[kind.index()]
    }

    pub fn is_empty(&self, kind: ItemKind) -> bool {
        self.lists[kind.index()].is_empty()
    }

    pub fn agent_locations(&self, handle: RegionHandle) -> &[ItemInfo] {
        self.agent_locations
            .get(&handle)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Agents reported in one region by the last snapshot.
    pub fn agent_count(&self, handle: RegionHandle) -> u32 {
        self.agent_locations(handle)
            .iter()
            .fold(0u32, |total, item| total.saturating_add(item.extra.max(0).unsigned_abs()))
    }

    /// Drops the global lists. Agent snapshots are kept.
    pub fn clear(&mut self) {
        for list in &mut self.lists {
            list.clear();
        }
        self.outstanding.clear();
    }

    pub fn reset(&mut self) {
        self.clear();
        self.agent_locations.clear();
    }
}

fn kind_for(category: ItemCategory) -> Option<ItemKind> {
    match category {
        ItemCategory::PgEvent => Some(ItemKind::PgEvents),
        ItemCategory::MatureEvent => Some(ItemKind::MatureEvents),
        ItemCategory::AdultEvent => Some(ItemKind::AdultEvents),
        ItemCategory::LandForSale => Some(ItemKind::LandForSale),
        ItemCategory::LandForSaleAdult => Some(ItemKind::LandForSaleAdult),
        ItemCategory::Telehub | ItemCategory::AgentLocations | ItemCategory::Classified => None,
    }
}

fn event_timestamp(unix_seconds: i32, format: &str) -> String {
    let Some(time) = DateTime::from_timestamp(i64::from(unix_seconds), 0) else {
        return String::new();
    };
    let mut out = String::new();
    if write!(out, "{}", time.format(format)).is_err() {
        out = time.to_rfc3339();
    }
    out
}

/// Stable per-region tint so neighbouring telehubs are distinguishable.
fn telehub_color(handle: RegionHandle) -> [u8; 4] {
    let grid = handle.grid();
    let (x, y) = (grid.x, grid.y);
    let channel = |v: f32| (v * 0.11).rem_euclid(1.0) * 0.8;
    let red = channel(x as f32);
    let green = channel(y as f32);
    let blue = channel(1.5 * x.wrapping_add(y) as f32);
    let mut add = if x % 2 == 1 { 0.15 } else { -0.15 };
    add += if y % 2 == 1 { -0.15 } else { 0.15 };
    let to_byte = |v: f32| ((v + add) * 255.0) as u8;
    [to_byte(red), to_byte(green), to_byte(blue), 255]
}
