//! HTTP surface. Marshaling only; all protocol behavior lives in
//! [`crate::session`] and below.

pub mod routes;

pub use routes::router;
