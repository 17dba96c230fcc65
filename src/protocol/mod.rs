pub mod backend;
pub mod canonical;
pub mod mapping;
pub mod messages;
