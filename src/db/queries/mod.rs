//! Database queries

pub mod contact;
pub mod list;
pub mod upload_job;
