pub mod learning;
pub mod logging;
pub mod models;
pub mod rng;
pub mod scenario;
pub mod simulation;
