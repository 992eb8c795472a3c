pub mod performance;
pub mod spatial;
pub mod world;
