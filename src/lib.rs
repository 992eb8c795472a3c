//! AOI Resolver Library
//!
//! Server-side area-of-interest resolution: decides, once per update
//! interval, which entities each connected client's viewpoints subscribe to.
//!
//! The subscription cap for each viewpoint is the lower of two limits: one
//! from server frame load and one from the client's round-trip time.
//! Candidates beyond the cap are dropped farthest first.

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod metrics;
pub mod sim;
