pub mod billing;
pub mod cache;
pub mod db;
pub mod memory_cache;
pub mod publisher;
