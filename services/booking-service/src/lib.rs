//! Booking service: the saga's entry point and its compensating end.

pub mod config;
pub mod consumers;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod workers;
