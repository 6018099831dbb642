//! Storage configuration.

use std::borrow::Cow;

pub const DEFAULT_STORAGE_NAME: &str = "oop-storage";

/// Construction parameters for an [`OopStorage`](crate::OopStorage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Name used in log output.
    pub name: Cow<'static, str>,
    /// Upper bound on the number of live blocks. `None` means unbounded.
    ///
    /// Once reached, allocation fails instead of growing the storage.
    pub max_blocks: Option<usize>,
}

impl StorageConfig {
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            max_blocks: None,
        }
    }

    #[must_use]
    pub const fn with_max_blocks(mut self, max_blocks: usize) -> Self {
        self.max_blocks = Some(max_blocks);
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_NAME)
    }
}
