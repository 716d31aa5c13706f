//! Command implementations

pub mod activate;
pub mod launch;
pub mod status;
