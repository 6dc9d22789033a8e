// Library modules for sosflow
pub mod cli;
pub mod config;
pub mod controller;
pub mod dag;
pub mod error;
pub mod eval;
pub mod executor;
pub mod script;
pub mod signature;
pub mod target;
pub mod workflow;
