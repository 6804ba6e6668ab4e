//! Bridge core: the process-wide broker connection

pub mod manager;

pub use manager::ConnectionManager;
