//! Durable user records and their store.

pub mod store;
pub mod types;

pub use store::UserStore;
pub use types::{PasskeyCredential, SafeRecord, SafeSessionConfig, User};
