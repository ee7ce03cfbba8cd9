//! Test doubles for the bridge's two external boundaries: the serial line
//! source and the pub/sub client

pub mod mocks;

pub use mocks::*;
