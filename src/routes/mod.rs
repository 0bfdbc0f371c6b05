//! Router Module Index
//!
//! Routes are split by access level so authentication is applied per module as a layer,
//! never per handler by accident.

/// Routes open to anonymous clients.
pub mod public;

/// Routes behind the `AuthUser` middleware. Permission checks happen in the handlers.
pub mod authenticated;
