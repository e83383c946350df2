pub mod config;
pub mod panels;
