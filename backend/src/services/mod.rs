pub mod audit_log;
pub mod credentials;
pub mod csrf;
pub mod ephemeral;
pub mod lockout;
pub mod login;
pub mod rate_limit;
pub mod session;
pub mod two_factor;
