pub mod engine;
pub mod standings;
pub mod week;
