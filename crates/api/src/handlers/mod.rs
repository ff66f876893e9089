//! Request handlers.
//!
//! Handlers translate query strings and bodies into engine calls and map
//! errors via [`AppError`](crate::error::AppError).

pub mod observations;
pub mod predictions;
pub mod statistics;
