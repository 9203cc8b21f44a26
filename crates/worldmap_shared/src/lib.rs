pub mod coords;
pub mod protocol;
