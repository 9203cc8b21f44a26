use glam::UVec2;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};
use worldmap_shared::coords::{BlockId, BLOCK_SIZE_REGIONS, MAX_GRID_COORD};
use worldmap_shared::protocol::{MapLayer, MapRequest, RegionBlock};

use crate::directory::{RegionDirectory, RegionUpdate};
use crate::texture::TextureBooster;
use crate::transport::RequestSink;

const MAX_BLOCK_INDEX: u32 = MAX_GRID_COORD / BLOCK_SIZE_REGIONS;

/// Identifies one outstanding block fetch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockState {
    Pending(RequestToken),
    Loaded,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestPolicy {
    /// Skip blocks with a fetch in flight.
    SkipPending,
    /// Skip blocks in flight or already answered.
    SkipKnown,
    /// Always issue.
    Force,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockReplySummary {
    /// Regions (or empty cells) the directory did not know before this reply.
    pub touched: usize,
    pub bounds_changed: bool,
    pub found_nonexistent: bool,
}

/// Batches region metadata fetches into 16x16-region blocks and keeps at most
/// one fetch per (layer, block) in flight.
#[derive(Debug)]
pub struct GridBlockScheduler {
    blocks: FxHashMap<(MapLayer, BlockId), BlockState>,
    next_token: u64,
    include_nonexistent: bool,
    mirror_land_for_sale: bool,
}

impl GridBlockScheduler {
    pub fn new(include_nonexistent: bool, mirror_land_for_sale: bool) -> Self {
        Self {
            blocks: FxHashMap::default(),
            next_token: 1,
            include_nonexistent,
            mirror_land_for_sale,
        }
    }

    /// Requests every block overlapping the inclusive meter rectangle `min..=max`.
    /// Returns how many blocks were requested for `layer`.
    pub fn request_range(
        &mut self,
        min: UVec2,
        max: UVec2,
        layer: MapLayer,
        force: bool,
        sink: &mut dyn RequestSink,
    ) -> u32 {
        let policy = if force {
            RequestPolicy::Force
        } else {
            RequestPolicy::SkipPending
        };
        self.request_range_with(min, max, layer, policy, sink)
    }

    pub fn request_range_with(
        &mut self,
        min: UVec2,
        max: UVec2,
        layer: MapLayer,
        policy: RequestPolicy,
        sink: &mut dyn RequestSink,
    ) -> u32 {
        let lo = BlockId::containing_meters(min.min(max));
        let hi = BlockId::containing_meters(min.max(max));

        let mut requested = 0;
        for y in lo.y.min(MAX_BLOCK_INDEX)..=hi.y.min(MAX_BLOCK_INDEX) {
            for x in lo.x.min(MAX_BLOCK_INDEX)..=hi.x.min(MAX_BLOCK_INDEX) {
                requested += self.request_block(BlockId { x, y }, layer, policy, sink);
            }
        }
        requested
    }

    pub fn request_block(
        &mut self,
        block: BlockId,
        layer: MapLayer,
        policy: RequestPolicy,
        sink: &mut dyn RequestSink,
    ) -> u32 {
        if !self.issue(block, layer, policy, sink) {
            return 0;
        }
        if self.mirror_land_for_sale && layer != MapLayer::LandForSale {
            self.issue(block, MapLayer::LandForSale, policy, sink);
        }
        1
    }

    fn issue(
        &mut self,
        block: BlockId,
        layer: MapLayer,
        policy: RequestPolicy,
        sink: &mut dyn RequestSink,
    ) -> bool {
        let key = (layer, block);
        let skip = match (policy, self.blocks.get(&key)) {
            (RequestPolicy::Force, _) => false,
            (_, Some(BlockState::Pending(_))) => true,
            (RequestPolicy::SkipKnown, Some(BlockState::Loaded)) => true,
            _ => false,
        };
        if skip {
            return false;
        }

        let token = RequestToken(self.next_token);
        self.next_token += 1;
        self.blocks.insert(key, BlockState::Pending(token));

        let rect = block.grid_rect();
        debug!(
            "Requesting {layer} block ({}, {}) grid ({}, {})-({}, {}) token {}",
            block.x, block.y, rect.min_x, rect.min_y, rect.max_x, rect.max_y, token.0
        );
        sink.send(MapRequest::Block {
            layer,
            rect,
            include_nonexistent: self.include_nonexistent,
        });
        true
    }

    /// Applies a block reply to the directory and settles the blocks it covers.
    pub fn on_block_reply(
        &mut self,
        directory: &mut RegionDirectory,
        layer: MapLayer,
        regions: &[RegionBlock],
        booster: &mut dyn TextureBooster,
    ) -> BlockReplySummary {
        let mut summary = BlockReplySummary::default();
        let mut covered = FxHashSet::default();

        for region in regions {
            let handle = region.handle();
            covered.insert(handle.block());

            if region.access.is_nonexistent() {
                summary.found_nonexistent = true;
                if directory.mark_nonexistent(handle) {
                    summary.touched += 1;
                }
                continue;
            }

            // Some grids list nameless regions that are not flagged as nonexistent.
            if region.name.is_empty() {
                warn!("Ignoring nameless region at grid ({}, {})", region.grid_x, region.grid_y);
                continue;
            }

            let known = directory.is_known(handle);
            let outcome = directory.upsert(RegionUpdate::from_block(layer, region), booster);
            if !known {
                summary.touched += 1;
            }
            summary.bounds_changed |= outcome.bounds_changed;
        }

        for block in covered {
            if let Some(state) = self.blocks.get_mut(&(layer, block)) {
                *state = BlockState::Loaded;
            }
        }

        summary
    }

    pub fn block_state(&self, layer: MapLayer, block: BlockId) -> Option<BlockState> {
        self.blocks.get(&(layer, block)).copied()
    }

    pub fn is_pending(&self, layer: MapLayer, block: BlockId) -> bool {
        matches!(self.block_state(layer, block), Some(BlockState::Pending(_)))
    }

    pub fn pending_count(&self) -> usize {
        self.blocks
            .values()
            .filter(|state| matches!(state, BlockState::Pending(_)))
            .count()
    }

    /// Outstanding fetches with their tokens.
    pub fn pending(&self) -> impl Iterator<Item = (MapLayer, BlockId, RequestToken)> + '_ {
        self.blocks.iter().filter_map(|(&(layer, block), state)| match state {
            BlockState::Pending(token) => Some((layer, block, *token)),
            BlockState::Loaded => None,
        })
    }

    /// Forgets block state for one layer or all, so the blocks are requested again.
    pub fn clear(&mut self, layer: Option<MapLayer>) {
        match layer {
            Some(layer) => self.blocks.retain(|(l, _), _| *l != layer),
            None => self.blocks.clear(),
        }
    }
}
