// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Image references, compose service names, and phantom-typed Docker IDs.

mod id;
mod image_ref;
mod service_name;

pub use id::{ContainerId, ImageId};
pub use image_ref::{ImageRef, ImageSource, ParseImageRefError};
pub use service_name::{ServiceName, ServiceNameError};
