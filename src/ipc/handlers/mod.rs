pub mod batch;
pub mod cards;
pub mod core;
pub mod data;
pub mod students;
