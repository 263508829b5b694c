pub mod keys;
pub mod store;

pub use keys::{SessionKey, UserKey};
pub use store::StateStore;
