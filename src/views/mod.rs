pub mod auth;
pub mod build;
pub mod change;
pub mod project;
pub mod utils;
