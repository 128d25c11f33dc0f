//! treestream - stream UI trees with deferred subtrees.
//!
//! A producer renders what it can synchronously and leaves placeholders where
//! subtrees are still computing; those arrive later as separate chunks. The
//! consumer installs the first chunk as the base tree and patches each later
//! one in at its placeholder. Client-resolved subtrees travel as lazy
//! references and load through a memoized [`lazy::LazyResolver`].

pub mod config;
pub mod demo;
pub mod error;
pub mod lazy;
pub mod server;
pub mod streaming;
pub mod transport;
pub mod tree;
pub mod view;

pub use error::{DecodeError, EncodeError, Result, StreamError};
pub use tree::{props, Node, PlaceholderId, Props, Resolution, Scalar};
