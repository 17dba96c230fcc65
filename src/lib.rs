pub mod config;
pub mod error;
pub mod fc;
pub mod observability;
pub mod protocol;
pub mod state;
pub mod stream;

mod util;
