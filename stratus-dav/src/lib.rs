// utils
pub mod error;
pub mod xml;

// webdav
pub mod types;
pub mod decoder;
pub mod encoder;

// responses
pub mod multistatus;
