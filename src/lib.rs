//! Warden - authorization decision engine
//!
//! Resolves who is calling from request metadata, expands role inheritance
//! from a KDL catalog, and decides whether caller-supplied policies grant a
//! permission.

pub mod authz;
pub mod errors;
pub mod server;
pub mod settings;
