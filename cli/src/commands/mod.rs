pub mod admin;
pub mod health;
pub mod ingest;
pub mod inspect;
