pub mod error;
pub mod lock;
pub mod user;

// storage contract
pub mod adapter;
pub mod properties;
pub mod resource;

// backends
pub mod memory;

pub use adapter::Adapter;
pub use error::{DavError, Result};
pub use lock::Lock;
pub use properties::Properties;
pub use resource::{ByteStream, Resource};
pub use user::User;
