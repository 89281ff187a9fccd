pub mod auth;
pub mod client_ip;
pub mod csrf;
pub mod logging;
pub mod request_id;

pub use auth::*;
pub use client_ip::*;
pub use csrf::*;
pub use logging::*;
pub use request_id::*;
