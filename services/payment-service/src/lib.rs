//! Payment service: the charge step of the saga and its bounded manual
//! retry path.

pub mod config;
pub mod consumers;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod workers;
