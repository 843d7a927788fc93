//! Media transport credentials for video debates

pub mod token;

pub use token::{room_name, MediaCredential, MediaTokenIssuer};
