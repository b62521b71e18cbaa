pub mod live_window;
pub mod triggers;
