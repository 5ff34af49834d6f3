//! botprobe: drive a messaging UI like a human, probe a chat bot, and count
//! how many of its replies match the expected patterns.
//!
//! The crate is organised leaves first: an [`surface::AutomationSurface`]
//! abstracts the browser, [`session::SessionStore`] persists login state,
//! [`auth::AuthController`] establishes a live session, and
//! [`monitor::ProbeEngine`] runs the probe/classify loop. Everything
//! platform-specific is data in [`platform::PlatformAdapter`].

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod log;
pub mod monitor;
pub mod orchestrator;
pub mod paths;
pub mod pattern;
pub mod platform;
pub mod server;
pub mod session;
pub mod shell_completion;
pub mod surface;
pub mod wait;
