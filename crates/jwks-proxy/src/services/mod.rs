//! Token validation services.

pub mod proxy;
pub mod validator;

pub use proxy::build_validator;
pub use validator::ClaimsValidator;
