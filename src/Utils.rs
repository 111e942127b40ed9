//! different utility modules used throughout the project
/// terminal logger setup and per-iteration history saved into csv file
pub mod logger;
