pub mod config;
pub mod driver;
pub mod manifests;
pub mod reconcile;
pub mod render;
