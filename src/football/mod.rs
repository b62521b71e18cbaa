pub mod api;
pub mod leagues;
pub mod models;
