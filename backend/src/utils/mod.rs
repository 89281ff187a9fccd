pub mod cookies;
pub mod mfa;
pub mod password;
pub mod security;

pub use password::*;
