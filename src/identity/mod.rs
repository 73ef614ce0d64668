//! Users, their provider accounts, and the reconciliation rules between them.
//!
//! - A user owns at most one live account per provider.
//! - A user always keeps at least one live account; unlinking the last one fails.
//! - Accounts are soft-deleted, never removed, except to undo a registration
//!   whose account could not be stored.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod repo;
pub mod service;

pub use memory::MemoryIdentityStore;
pub use models::{Account, Provider, Role, User};
pub use postgres::PgIdentityStore;
pub use repo::IdentityStore;
pub use service::{IdentityError, IdentityService, Registration};
