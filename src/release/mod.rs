//! Version & release resolution and the release pipeline
//!
//! The resolver half (`version`, `changelog`, `description`) is pure: callers
//! read the documents and hand in their text. `metadata` and `pipeline` do
//! the I/O around it.

pub mod changelog;
pub mod description;
pub mod metadata;
pub mod pipeline;
pub mod signing;
pub mod version;

pub use changelog::{resolve_change_notes, resolve_entry, Changelog, ChangelogEntry, OutputType};
pub use metadata::PluginMetadata;
pub use version::{derive_channel, ReleaseChannel, Version};
