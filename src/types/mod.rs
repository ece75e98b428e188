//! Type definitions

pub mod contact;
pub mod messages;
pub mod upload_job;

pub use contact::*;
pub use messages::*;
pub use upload_job::*;
