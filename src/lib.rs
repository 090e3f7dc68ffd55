#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod classifier;
pub mod crawler;
pub mod normalizer;
pub mod pool;
pub mod runner;
pub mod store;
pub mod submitter;
pub mod types;
pub mod utils;
