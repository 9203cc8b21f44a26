pub mod bounds;
pub mod config;
pub mod directory;
pub mod error;
pub mod items;
pub mod layers;
pub mod resolver;
pub mod scheduler;
pub mod shared;
pub mod texture;
pub mod tracking;
pub mod transport;
pub mod world_map;

pub use config::WorldMapConfig;
pub use error::{MapError, ResolveError};
pub use shared::SharedWorldMap;
pub use world_map::WorldMap;
