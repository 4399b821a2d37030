pub mod api;
pub mod config;
pub mod jobs;
pub mod observability;
pub mod resolver;
pub mod worker;
