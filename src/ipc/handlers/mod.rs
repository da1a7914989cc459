pub mod attendance;
pub mod core;
pub mod directory;
pub mod results;
