//! Authentication primitives.
//!
//! - [`jwt`] -- JWT access-token validation (and generation for tooling).

pub mod jwt;
