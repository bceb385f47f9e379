// Copyright 2025 Cornell University
// released under MIT License

pub mod collection;
pub mod config;
pub mod description;
pub mod diagnostic;
pub mod errors;
pub mod factory;
pub mod ir;
pub mod parser;
pub mod peers;
pub mod requirements;
pub mod scenario;
pub mod selective;
pub mod selectors;
pub mod separation;
pub mod serialize;
pub mod setup;
