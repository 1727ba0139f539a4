pub mod channel;
pub mod clock;
pub mod config;
pub mod handler;
pub mod http;
pub mod interactions;
pub mod lease;
pub mod notify;
pub mod params;
pub mod provider;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
