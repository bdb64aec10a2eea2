pub mod cloud_storage;
pub mod config;
pub mod download_client;
pub mod error;
pub mod github;
pub mod lanzou;
pub mod logging;
pub mod state;
pub mod sync;
pub mod tasks;

#[cfg(test)]
pub mod test_helpers;
