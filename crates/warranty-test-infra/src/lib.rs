//! Fixtures shared by the warranty integration tests: a disposable MySQL
//! server and in-process stand-ins for the platform collaborators.

mod error;
pub mod fakes;
pub mod mysql;

pub use error::{Result, TestInfraError};
