use std::{path::Path, path::PathBuf, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    command::{FRAME_LEN, STOP_INIT},
    error::Error,
};

/// The port controllers connect to unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8081;

/// How commands are cut out of the controller's byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Framing {
    /// Every command is exactly one full frame.
    #[default]
    Fixed,

    /// Every command is whatever a single receive returns, up to a full frame.
    /// Needed for controllers which send unpadded commands.
    Segment,
}

/// Where and how the virtual device node is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Candidate paths for the device node.
    /// The first one not already taken is used.
    pub paths: Vec<PathBuf>,

    /// Permission bits for the pseudo-terminal.
    pub mode: u32,

    /// The group the device node should belong to, if any.
    pub group: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            paths: (0..8)
                .map(|n| PathBuf::from(format!("/dev/ttyUSB{n}")))
                .collect(),
            mode: 0o660,
            group: Some("dialout".into()),
        }
    }
}

/// Parameters of the initialization handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Written to the device once per round.
    pub probe: String,

    /// The device's acknowledgement.
    pub marker: String,

    /// A controller sending this while a handshake runs cancels it.
    /// `None` makes the handshake uncancellable.
    pub cancel_token: Option<String>,

    /// How long the device gets to answer a probe, in milliseconds.
    pub settle_ms: u64,

    /// How long polling reads wait for data, in milliseconds.
    pub poll_timeout_ms: u64,

    /// How many bytes are read from the device per round.
    pub read_len: usize,

    /// Accept any single byte of the marker as an acknowledgement.
    /// Covers devices whose echo swallows part of the marker.
    pub accept_partial_marker: bool,

    /// Give up after this many rounds.
    /// `None` keeps probing until acknowledged or cancelled.
    pub max_rounds: Option<u32>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            probe: "n".into(),
            marker: "bt".into(),
            cancel_token: Some(STOP_INIT.into()),
            settle_ms: 100,
            poll_timeout_ms: 1,
            read_len: 2,
            accept_partial_marker: true,
            max_rounds: None,
        }
    }
}

impl HandshakeConfig {
    pub(crate) fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub(crate) fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Parameters of the command loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How commands are framed.
    pub framing: Framing,

    /// How long to wait for the device to echo back what was written to it, in milliseconds.
    pub drain_timeout_ms: u64,

    /// How long the device gets to answer a forwarded payload, in milliseconds.
    pub forward_settle_ms: u64,

    /// How many bytes of a device answer to read (and log).
    pub response_read_len: usize,

    /// How long polling reads wait for data, in milliseconds.
    pub poll_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            drain_timeout_ms: 1,
            forward_settle_ms: 100,
            response_read_len: 10,
            poll_timeout_ms: 1,
        }
    }
}

impl BridgeConfig {
    pub(crate) fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub(crate) fn forward_settle(&self) -> Duration {
        Duration::from_millis(self.forward_settle_ms)
    }

    pub(crate) fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// The configuration used for running the emulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The port controllers connect to.
    pub port: u16,

    /// Stop serving once the first controller session is over.
    pub single_session: bool,

    /// See [`DeviceConfig`].
    pub device: DeviceConfig,

    /// See [`HandshakeConfig`].
    pub handshake: HandshakeConfig,

    /// See [`BridgeConfig`].
    pub bridge: BridgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            single_session: false,
            device: DeviceConfig::default(),
            handshake: HandshakeConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Not valid RON: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            single_session: true,
            device: DeviceConfig {
                paths: vec!["/dev/ttyUSB1".into(), "/dev/ttyUSB2".into()],
                mode: 0o666,
                group: None,
            },
            handshake: HandshakeConfig {
                max_rounds: Some(600),
                ..Default::default()
            },
            bridge: BridgeConfig {
                framing: Framing::Segment,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::BadConfig(format!("Could not serialize: {e}")))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p)?;

        Self::deserialize(&s)
    }

    fn check_device(&self) -> Result<(), Error> {
        let device = &self.device;

        if device.paths.is_empty() {
            return Err(Error::BadConfig(
                "No device paths given. Please list at least one candidate path.".into(),
            ));
        }

        let duplicates = device.paths.iter().duplicates().collect::<Vec<_>>();
        if !duplicates.is_empty() {
            return Err(Error::BadConfig(format!(
                "Device paths must be unique. Duplicates: {duplicates:?}"
            )));
        }

        if device.mode > 0o7777 {
            return Err(Error::BadConfig(format!(
                "The device mode {:#o} has bits set outside of 0o7777",
                device.mode
            )));
        }

        Ok(())
    }

    fn check_handshake(&self) -> Result<(), Error> {
        let handshake = &self.handshake;

        if handshake.probe.is_empty() {
            return Err(Error::BadConfig("The handshake probe is empty".into()));
        }

        if handshake.marker.is_empty() {
            return Err(Error::BadConfig("The handshake marker is empty".into()));
        }

        if let Some(token) = &handshake.cancel_token {
            if token.is_empty() || token.len() > FRAME_LEN {
                return Err(Error::BadConfig(format!(
                    "The cancel token `{token}` must be between 1 and {FRAME_LEN} bytes"
                )));
            }
        }

        if handshake.read_len == 0 {
            return Err(Error::BadConfig("The handshake read length is zero".into()));
        }

        if handshake.max_rounds == Some(0) {
            return Err(Error::BadConfig(
                "A handshake limited to zero rounds can never succeed".into(),
            ));
        }

        Ok(())
    }

    fn check_bridge(&self) -> Result<(), Error> {
        if self.bridge.response_read_len == 0 {
            return Err(Error::BadConfig("The response read length is zero".into()));
        }

        Ok(())
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_device()?;
        self.check_handshake()?;
        self.check_bridge()?;

        Ok(())
    }
}
