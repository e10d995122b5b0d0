pub mod catalog;
pub mod collection;
pub mod dice;
pub mod engine;
pub mod field;
pub mod format;
pub mod loader;
pub mod modifier;
pub mod random;
pub mod repository;
