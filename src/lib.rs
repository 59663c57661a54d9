//! idlelockd - blank an idle screen unless trusted media is playing.
//!
//! Each tick samples idle time, finds running whitelisted processes, asks the
//! audio provider whether any of them is audible, and lets the decision engine
//! start or stop the lock surface.

pub mod audio;
pub mod config;
pub mod engine;
pub mod idle;
pub mod instance;
pub mod lock;
pub mod monitor;
pub mod presence;
pub mod shell;
pub mod whitelist;
