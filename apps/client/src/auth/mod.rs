//! Authentication stack: token persistence, the identity provider client,
//! the session state machine, and the redirect callback glue.

pub mod callback;
pub mod provider;
pub mod session;
pub mod store;
pub mod tokens;
