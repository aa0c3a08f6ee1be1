pub mod config;
pub mod event;
pub mod sync;
pub mod tag;
