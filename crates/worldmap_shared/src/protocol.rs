use std::fmt;

use bitflags::bitflags;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coords::{GridRect, RegionHandle, TileExtents};

pub const PROTOCOL_VERSION: u32 = 1;

/// Flag OR'ed into block request flags so the server lists empty cells too.
pub const RETURN_NONEXISTENT_FLAG: u32 = 0x10000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RegionFlags: u32 {
        const ALLOW_DAMAGE          = 1 << 0;
        const ALLOW_LANDMARK        = 1 << 1;
        const ALLOW_SET_HOME        = 1 << 2;
        const RESET_HOME_ON_TP      = 1 << 3;
        const SUN_FIXED             = 1 << 4;
        const BLOCK_TERRAFORM       = 1 << 6;
        const SANDBOX               = 1 << 8;
        const SKIP_COLLISIONS       = 1 << 12;
        const SKIP_SCRIPTS          = 1 << 13;
        const SKIP_PHYSICS          = 1 << 14;
        const EXTERNALLY_VISIBLE    = 1 << 15;
        const BLOCK_FLY             = 1 << 19;
        const ALLOW_DIRECT_TELEPORT = 1 << 20;
        const RESTRICT_PUSHOBJECT   = 1 << 22;
        const ALLOW_VOICE           = 1 << 28;
    }
}

/// Region maturity/availability code as reported by the grid.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimAccess(pub u8);

impl SimAccess {
    pub const MIN: Self = Self(0);
    pub const PG: Self = Self(13);
    pub const MATURE: Self = Self(21);
    pub const ADULT: Self = Self(42);
    pub const DOWN: Self = Self(254);
    pub const NONEXISTENT: Self = Self(255);

    pub fn is_nonexistent(self) -> bool {
        self == Self::NONEXISTENT
    }

    pub fn is_down(self) -> bool {
        self == Self::DOWN
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::PG => "General",
            Self::MATURE => "Moderate",
            Self::ADULT => "Adult",
            Self::DOWN => "Offline",
            Self::NONEXISTENT => "Nonexistent",
            _ => "Unknown",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MapLayer {
    Objects,
    Terrain,
    LandForSale,
}

impl MapLayer {
    pub const ALL: [MapLayer; 3] = [MapLayer::Objects, MapLayer::Terrain, MapLayer::LandForSale];
    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn wire_id(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for MapLayer {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MapLayer::Objects),
            1 => Ok(MapLayer::Terrain),
            2 => Ok(MapLayer::LandForSale),
            other => Err(other),
        }
    }
}

impl fmt::Display for MapLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MapLayer::Objects => "objects",
            MapLayer::Terrain => "terrain",
            MapLayer::LandForSale => "land-for-sale",
        };
        f.write_str(name)
    }
}

/// Map item categories, numbered as on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemCategory {
    Telehub,
    PgEvent,
    MatureEvent,
    AgentLocations,
    LandForSale,
    Classified,
    AdultEvent,
    LandForSaleAdult,
}

impl ItemCategory {
    pub fn wire_id(self) -> u32 {
        match self {
            ItemCategory::Telehub => 1,
            ItemCategory::PgEvent => 2,
            ItemCategory::MatureEvent => 3,
            ItemCategory::AgentLocations => 6,
            ItemCategory::LandForSale => 7,
            ItemCategory::Classified => 8,
            ItemCategory::AdultEvent => 9,
            ItemCategory::LandForSaleAdult => 10,
        }
    }
}

impl TryFrom<u32> for ItemCategory {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ItemCategory::Telehub),
            2 => Ok(ItemCategory::PgEvent),
            3 => Ok(ItemCategory::MatureEvent),
            6 => Ok(ItemCategory::AgentLocations),
            7 => Ok(ItemCategory::LandForSale),
            8 => Ok(ItemCategory::Classified),
            9 => Ok(ItemCategory::AdultEvent),
            10 => Ok(ItemCategory::LandForSaleAdult),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapRequest {
    Layer {
        layer: MapLayer,
    },
    Block {
        layer: MapLayer,
        rect: GridRect,
        include_nonexistent: bool,
    },
    NameRegion {
        layer: MapLayer,
        name: String,
    },
    HandleRegion {
        layer: MapLayer,
        handle: RegionHandle,
    },
    Item {
        layer: MapLayer,
        category: ItemCategory,
        region: Option<RegionHandle>,
    },
}

impl MapRequest {
    /// Flags word as the grid expects it: layer id plus request modifiers.
    pub fn flags(&self) -> u32 {
        match self {
            MapRequest::Block {
                layer,
                include_nonexistent,
                ..
            } => {
                let mut flags = layer.wire_id();
                if *include_nonexistent {
                    flags |= RETURN_NONEXISTENT_FLAG;
                }
                flags
            }
            MapRequest::HandleRegion { layer, .. } => layer.wire_id() | RETURN_NONEXISTENT_FLAG,
            MapRequest::Layer { layer }
            | MapRequest::NameRegion { layer, .. }
            | MapRequest::Item { layer, .. } => layer.wire_id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapReply {
    Layer {
        layer: u32,
        tiles: Vec<LayerTile>,
    },
    Block {
        layer: u32,
        regions: Vec<RegionBlock>,
    },
    Item {
        category: u32,
        region: Option<RegionHandle>,
        items: Vec<ItemBlock>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerTile {
    pub extents: TileExtents,
    pub image_id: Uuid,
}

/// One region as listed in a block reply. Coordinates are grid units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionBlock {
    pub grid_x: u16,
    pub grid_y: u16,
    pub name: String,
    pub access: SimAccess,
    pub region_flags: u32,
    pub image_id: Uuid,
    /// Region size in meters when the grid supports variable-size regions.
    pub size: Option<(u16, u16)>,
}

impl RegionBlock {
    pub fn handle(&self) -> RegionHandle {
        RegionHandle::from_grid(u32::from(self.grid_x), u32::from(self.grid_y))
    }
}

/// One map item; `x`/`y` are global meters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemBlock {
    pub x: u32,
    pub y: u32,
    pub id: Uuid,
    pub name: String,
    pub extra: i32,
    pub extra2: i32,
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(msg)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(data)
}
