//! Local media cache: filename convention and maintenance.

pub mod cache_maintenance;
pub mod cache_naming;
