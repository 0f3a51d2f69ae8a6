pub mod traits;
pub mod clock;
pub mod config;
pub mod time_sync;
pub mod countdown;
pub mod target;
pub mod snapshot;
pub mod schedule;
pub mod sse;
pub mod transport;
pub mod source;
pub mod render;
pub mod present;
pub mod status;
pub mod driver;
