/// The pseudo-terminal master as an async byte stream.
pub(crate) mod pty;

/// Publishing the pseudo-terminal as a device node.
pub(crate) mod provision;

pub use provision::{VirtualDevice, VirtualDeviceBuilder};
pub use pty::PtyDevice;
