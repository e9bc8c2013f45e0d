//! Session lifecycle: login, silent renewal, reuse-triggered revocation.

pub mod rotation;

pub use rotation::{hash_password, RotationProtocol};
