pub mod capture;
pub mod config;
pub mod dom;
pub mod logging;
pub mod mirror;
pub mod patch;
pub mod protocol;
pub mod proxy;
pub mod session;
pub mod transport;
