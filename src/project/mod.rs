//! Project module - lifecycle state, content checksums and locking
//!
//! A generated project moves through `Scaffolded -> Validated -> Deployed`.
//! The checksum recorded at validation time gates deployment.

pub mod checksum;
pub mod lock;
pub mod state;

pub use checksum::ChecksumEngine;
pub use lock::ProjectLock;
pub use state::{DeployedData, ProjectState, StateKind, ValidatedData};
