//! Pet shop back-office core
//!
//! Appointment scheduling with conflict-checked availability, cart and
//! checkout, and the inventory ledger that owns product stock and pet status.
//! A presentation layer drives these services; nothing here renders UI.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

pub use errors::{AppError, ServiceError};
pub use services::{ServiceContainer, ServiceFactory};
