//! Persistence traits with PostgreSQL and in-memory implementations.

pub mod audit_log;
pub mod memory;
pub mod session;
pub mod two_factor;
pub mod user;

pub use audit_log::{AuditLogRepository, PgAuditLogRepository};
pub use memory::MemoryStore;
pub use session::{PgSessionRepository, SessionRepository};
pub use two_factor::{PgTwoFactorRepository, TwoFactorRepository};
pub use user::{PgUserRepository, UserRepository};
