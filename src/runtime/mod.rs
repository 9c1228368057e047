// ABOUTME: Docker daemon access for the image pipeline.
// ABOUTME: Capability traits, the bollard implementation and connection errors.

mod bollard;
mod error;
pub mod traits;

pub use self::bollard::BollardRuntime;
pub use error::{RuntimeError, RuntimeErrorKind};
pub use traits::*;
