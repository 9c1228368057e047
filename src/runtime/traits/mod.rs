// ABOUTME: Composable capability traits for the Docker daemon.
// ABOUTME: Defines ImageOps and ContainerOps plus the DockerOps umbrella trait.

mod container;
mod image;
mod shared_types;

pub use container::{ContainerError, ContainerOps};
pub use image::{ImageError, ImageOps};
pub use shared_types::*;

/// Everything the orchestrator needs from Docker.
pub trait DockerOps: ImageOps + ContainerOps {}

impl<T: ImageOps + ContainerOps> DockerOps for T {}
