//! Shared domain logic for biosync: everything between a raw webhook body and
//! the canonical records the API persists. Nothing in this crate performs I/O.

pub mod auth;
pub mod biomarkers;
pub mod classify;
pub mod derived;
pub mod error;
pub mod fields;
pub mod kinds;
pub mod payload;
pub mod provider_events;
pub mod records;
pub mod sleep;
pub mod units;
pub mod workouts;
