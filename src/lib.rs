//! Client-side behavior for the lab device console: device status refresh
//! and table filter/sort over a DOM-like document tree.

pub mod config;
pub mod dom;
pub mod format;
pub mod monitor;
pub mod status;
pub mod table;
