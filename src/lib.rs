//! Registry and dispatcher for shell-script functions.
//!
//! Scripts are imported once into a two-scope registry (user and system),
//! then any function they define can be invoked by name, locally or on a
//! remote host over a multiplexed SSH channel, with output streamed back
//! line by line. Scripts stay plain bash; metadata comes from `#bcli:`
//! comment annotations and is re-scanned on demand, never cached.

pub mod complete;
pub mod config;
pub mod error;
pub mod includes;
pub mod local;
pub mod registry;
pub mod remote;
pub mod scan;
pub mod stream;

pub use error::{Error, Result};
