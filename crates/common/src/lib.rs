pub mod backend;
pub mod error;
pub mod filter;
pub mod types;
