use std::{
    fs::{File, OpenOptions, Permissions},
    io,
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
};

use nix::{
    fcntl::OFlag,
    pty::{grantpt, posix_openpt, ptsname_r, unlockpt},
    unistd::{chown, Group},
};
use tracing::{debug, info, warn};

use super::PtyDevice;
use crate::{config::DeviceConfig, error::Error};

/// Builds a [`VirtualDevice`].
#[derive(Debug, Default)]
pub struct VirtualDeviceBuilder {
    paths: Vec<PathBuf>,
    mode: Option<u32>,
    group: Option<String>,
}

impl VirtualDeviceBuilder {
    /// A builder without candidate paths.
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder using the candidate paths, mode and group of the device settings.
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            paths: config.paths.clone(),
            mode: Some(config.mode),
            group: config.group.clone(),
        }
    }

    /// Add a candidate path. Candidates are tried in the order they were added.
    pub fn add_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Permission bits for the pseudo-terminal slave.
    pub fn set_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Group owning the pseudo-terminal slave.
    pub fn set_group(mut self, group: Option<String>) -> Self {
        self.group = group;
        self
    }

    /// Open a pseudo-terminal and publish its slave under the first free candidate path.
    pub fn build(self) -> Result<VirtualDevice, Error> {
        if self.paths.is_empty() {
            return Err(Error::Provision("No candidate device paths".into()));
        }

        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK)?;
        grantpt(&master)?;
        unlockpt(&master)?;
        let slave_path = PathBuf::from(ptsname_r(&master)?);
        debug!(?slave_path, "Opened pseudo-terminal");

        // Keep the slave open. Otherwise reading the master fails with EIO.
        let slave = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NOCTTY.bits())
            .open(&slave_path)?;

        if let Some(mode) = self.mode {
            if let Err(e) = slave.set_permissions(Permissions::from_mode(mode)) {
                warn!(?slave_path, ?e, "Could not set permissions {mode:o}");
            }
        }

        if let Some(group) = &self.group {
            set_group(&slave_path, group);
        }

        let link = publish(&slave_path, &self.paths)?;
        info!(?link, ?slave_path, "Device published");

        Ok(VirtualDevice {
            endpoint: PtyDevice::new(master)?,
            _slave: slave,
            link,
            slave_path,
        })
    }
}

fn set_group(path: &Path, group: &str) {
    match Group::from_name(group) {
        Ok(Some(group)) => {
            if let Err(e) = chown(path, None, Some(group.gid)) {
                warn!(?path, ?e, group = %group.name, "Could not change group");
            }
        }
        Ok(None) => warn!(group, "No such group, leaving group unchanged"),
        Err(e) => warn!(group, ?e, "Group lookup failed"),
    }
}

fn publish(target: &Path, candidates: &[PathBuf]) -> Result<PathBuf, Error> {
    for candidate in candidates {
        match std::os::unix::fs::symlink(target, candidate) {
            Ok(()) => return Ok(candidate.clone()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                info!(?candidate, "Path taken, trying next");
            }
            Err(e) => {
                warn!(?candidate, ?e, "Could not link, trying next");
            }
        }
    }

    Err(Error::Provision(format!(
        "None of the {} candidate paths are free",
        candidates.len()
    )))
}

/// A pseudo-terminal published under a stable path, for as long as this value lives.
///
/// Dropping it removes the path.
#[derive(Debug)]
pub struct VirtualDevice {
    endpoint: PtyDevice,
    _slave: File,
    link: PathBuf,
    slave_path: PathBuf,
}

impl VirtualDevice {
    /// The published path, e.g. `/dev/ttyUSB0`.
    pub fn link(&self) -> &Path {
        &self.link
    }

    /// The pseudo-terminal slave the published path points to.
    pub fn slave_path(&self) -> &Path {
        &self.slave_path
    }

    /// The master side, which the emulator reads and writes.
    pub fn endpoint(&mut self) -> &mut PtyDevice {
        &mut self.endpoint
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.link) {
            Ok(()) => info!(link = ?self.link, "Device removed"),
            Err(e) => warn!(link = ?self.link, ?e, "Could not remove device"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn read_some(device: &mut PtyDevice) -> Vec<u8> {
        let mut buf = [0; 64];
        let len = tokio::time::timeout(Duration::from_secs(1), device.read(&mut buf))
            .await
            .unwrap()
            .unwrap();

        buf[..len].to_vec()
    }

    #[tokio::test]
    async fn link_lives_as_long_as_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyUSB0");

        let device = VirtualDeviceBuilder::new().add_path(&path).build().unwrap();

        assert_eq!(device.link(), path);
        assert_eq!(std::fs::read_link(&path).unwrap(), device.slave_path());

        drop(device);
        assert!(std::fs::symlink_metadata(&path).is_err());
    }

    #[tokio::test]
    async fn taken_paths_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let taken = dir.path().join("ttyUSB0");
        let free = dir.path().join("ttyUSB1");
        std::fs::write(&taken, b"someone else").unwrap();

        let device = VirtualDeviceBuilder::new()
            .add_path(&taken)
            .add_path(&free)
            .build()
            .unwrap();

        assert_eq!(device.link(), free);

        drop(device);
        assert_eq!(std::fs::read(&taken).unwrap(), b"someone else");
    }

    #[tokio::test]
    async fn no_free_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let taken = dir.path().join("ttyUSB0");
        std::fs::write(&taken, b"").unwrap();

        let result = VirtualDeviceBuilder::new().add_path(&taken).build();

        assert!(matches!(result, Err(Error::Provision(_))));
    }

    #[tokio::test]
    async fn mode_is_applied_to_slave() {
        let dir = tempfile::tempdir().unwrap();

        let device = VirtualDeviceBuilder::new()
            .add_path(dir.path().join("ttyUSB0"))
            .set_mode(0o600)
            .build()
            .unwrap();

        let mode = std::fs::metadata(device.slave_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn master_writes_are_echoed() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = VirtualDeviceBuilder::new()
            .add_path(dir.path().join("ttyUSB0"))
            .build()
            .unwrap();

        device.endpoint().write_all(b"n").await.unwrap();

        assert_eq!(read_some(device.endpoint()).await, b"n");
    }

    #[tokio::test]
    async fn slave_writes_reach_master() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = VirtualDeviceBuilder::new()
            .add_path(dir.path().join("ttyUSB0"))
            .build()
            .unwrap();

        let mut slave = OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NOCTTY.bits())
            .open(device.link())
            .unwrap();
        slave.write_all(b"bt").unwrap();

        assert_eq!(read_some(device.endpoint()).await, b"bt");
    }
}
