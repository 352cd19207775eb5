//! External source adapters, the merge and reconciliation engines, and the store.

pub mod chzzk;
pub mod http;
pub mod igdb;
pub mod mapping;
pub mod merge;
pub mod reconcile;
pub mod steam;
pub mod store;
pub mod throttle;
