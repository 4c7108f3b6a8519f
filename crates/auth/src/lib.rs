//! `tallyerp-auth`: role identity and role-membership lookup.
//!
//! Authentication and sessions are handled outside the ledger core; this crate
//! only answers "does this user hold that role?".

pub mod directory;
pub mod roles;

pub use directory::{DirectoryError, InMemoryRoleDirectory, RoleDirectory};
pub use roles::{Role, RoleRef};
