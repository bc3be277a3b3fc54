pub mod commands;
pub mod config;
pub mod database;
pub mod errors;
pub mod mutations;
pub mod schema;
pub mod serializers;
pub mod services;

#[cfg(feature = "graphql")]
pub mod graphql;
