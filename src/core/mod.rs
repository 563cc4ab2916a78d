pub mod bootstrap;
pub mod config;
pub mod middleware;
pub mod policy;
pub mod session;
pub mod tenancy;
