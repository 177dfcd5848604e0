mod archive;
mod auth;
mod coordinator;

pub use archive::{PersistenceError, RunArchive};
pub use auth::RunAuth;
pub use coordinator::{Finalized, RunCoordinator};
