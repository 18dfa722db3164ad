//! Route Handlers

pub mod admin;
pub mod reports;
pub mod status;
