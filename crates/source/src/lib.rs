//! Source synchronization for potato.
//!
//! Each Application gets its own local git mirror:
//!
//! - [`MirrorLayout`] derives the mirror path from the Application identity.
//! - [`GitSourceSync`] clones or fast-forwards the mirror through the `git`
//!   command line.
//! - [`PassLocks`] serializes work on one Application's mirror.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod git;
pub mod locks;
pub mod mirror;
pub mod sync;

pub use error::{Result, SyncError};
pub use git::{Git, GitFailure};
pub use locks::PassLocks;
pub use mirror::{MirrorLayout, encode_component};
pub use sync::{GitSourceSync, SourceSync, SyncReport, SyncStatus};
