//! Reference connectors shipped with Lochness.

use std::sync::Arc;

use lochness_core::Registry;

pub mod directory;
pub mod fileshare;
mod util;

pub use directory::DirectoryConnector;
pub use fileshare::FileshareConnector;

/// Registry preloaded with every connector in this crate.
pub fn builtin_registry() -> Registry {
    Registry::new()
        .with(Arc::new(FileshareConnector))
        .with(Arc::new(DirectoryConnector))
}
