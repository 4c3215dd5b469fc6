//! Host IDE control
//!
//! Launches the host with the robot server enabled, talks to it over the
//! control channel, and guarantees the process is gone when the session ends.

pub mod client;
pub mod flags;
pub mod session;

pub use client::{ControlChannel, RobotClient};
pub use flags::LaunchFlags;
pub use session::{start_session, HostSession, HostState};
