//! Backend adapters implementing the workspace capability traits (§4.D, §4.E).

pub mod api;
pub mod local;
