//! Monthly rent billing for shared rooms: occupancy proration, charge
//! aggregation, the bill lifecycle and the scheduled batch run.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;
pub mod state;

pub use error::{BillingError, BillingResult, DispatchError};
