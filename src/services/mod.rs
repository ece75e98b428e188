//! Import pipeline services

pub mod chunk_scheduler;
pub mod column_mapper;
pub mod contact_validator;
pub mod csv_tokenizer;
pub mod duplicate_resolver;
pub mod job_lock;
pub mod store;
