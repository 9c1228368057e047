// ABOUTME: Command module aggregator for the kube-compose CLI.
// ABOUTME: Re-exports the up and down command handlers.

mod connection;
mod down;
mod up;

pub use down::down;
pub use up::up;
