use thiserror::Error;
use worldmap_shared::coords::RegionHandle;

#[derive(Error, Debug)]
pub enum MapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse world map config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("failed to decode map message: {0}")]
    Decode(#[from] bincode::Error),
    #[error("invalid map layer {0}")]
    InvalidLayer(u32),
    #[error("invalid map item category {0}")]
    InvalidCategory(u32),
}

/// What a resolver request was keyed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveTarget {
    Name(String),
    Handle(RegionHandle),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("region {target:?} does not exist")]
    NotFound { target: ResolveTarget },
    #[error("cannot resolve region name {name:?}: {reason}")]
    Unresolvable { name: String, reason: &'static str },
}
