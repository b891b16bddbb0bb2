//! Shared application state.

use crate::runner::SeparatorCommand;
use crate::storage::Storage;

/// State handed to every request handler.
pub struct AppState {
    /// Upload and output roots.
    pub storage: Storage,
    /// How to invoke the separation tool.
    pub separator: SeparatorCommand,
}

impl AppState {
    pub fn new(storage: Storage, separator: SeparatorCommand) -> Self {
        Self { storage, separator }
    }
}
