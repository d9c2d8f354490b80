//! Hoard's virtual filesystem layer presents every configured storage
//! backend under one POSIX-style namespace, so callers can address a local
//! directory and a remote blob store the same way and move data between
//! them without caring which is which.
//!
//! # Layers
//! From the bottom up:
//!
//! - [`Backend`] is the contract a storage technology implements. Paths
//!   handed to it are already relative to wherever it is mounted.
//!   [`LocalDir`], [`MemoryFs`] and [`ContentStore`] are the built-in
//!   implementations, wrapped up in [`BackendInstance`].
//! - [`MountRegistry`] owns the backends and the table of mount points.
//! - [`PathResolver`] turns a virtual path into a [`ResolvedPath`] by
//!   longest mount-point match.
//! - [`StorageOps`] is the facade the rest of the program calls. It gates
//!   writes to read-only backends, adds path context to errors, and
//!   implements copy and rename across backends.

mod backend;
mod content_store;
pub mod error;
mod local_dir;
mod memory;
mod ops;
mod options;
pub mod path;
mod registry;
mod resolver;
mod tree;

pub use backend::*;
pub use content_store::{BlobClient, ContentRef, ContentStore, content_hash};
pub use error::{Error, ErrorKind, ResultExt};
pub use local_dir::LocalDir;
pub use memory::MemoryFs;
pub use ops::StorageOps;
pub use options::*;
pub use registry::{MOUNTS_KEY, MountEntry, MountRegistry};
pub use resolver::{PathResolver, ResolvedPath};

#[cfg(test)]
pub(crate) use content_store::tests as content_store_tests;
