pub mod config;
pub mod io;
pub mod narrative;
pub mod state;
