//! Generation jobs: submission client and the status poller.

pub mod client;
pub mod poller;
