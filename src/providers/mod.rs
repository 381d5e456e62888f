//! Identity provider implementations.

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "cognito")]
pub mod cognito;
