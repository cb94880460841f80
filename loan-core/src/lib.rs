// Mockall triggers this warning for every mocked trait.
#![cfg_attr(test, allow(clippy::unused_unit))]

#[macro_use]
mod macros;

pub mod dispatcher;
pub mod error;
pub mod event_log;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod request_state;
pub mod serialization;
pub mod store;
