#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod dispatch;
pub mod entities;
pub mod framework;
pub mod handlers;
pub mod key;
pub mod replay;
pub mod schema;
pub mod store;
pub mod testing;
