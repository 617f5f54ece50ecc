//! Library and device wrappers that splice the ISO 15765 transport into an
//! existing pass-through stack. Everything except `connect` of an ISO 15765
//! protocol is delegated untouched.

use tracing::debug;

use crate::isotp::Iso15765Channel;
use crate::passthru::constants::PROTOCOL_ID_MASK;
use crate::passthru::types::DeviceVersion;
use crate::passthru::{Channel, ConnectFlags, Device, Library, Protocol};
use crate::Result;

/// Wraps a pass-through library so that every device it opens gains ISO
/// 15765 support.
pub struct Iso15765Library {
    inner: Box<dyn Library>,
}

impl Iso15765Library {
    pub fn new(inner: Box<dyn Library>) -> Self {
        Self { inner }
    }
}

impl Library for Iso15765Library {
    fn open(&mut self, name: Option<&str>) -> Result<Box<dyn Device>> {
        let device = self.inner.open(name)?;
        Ok(Box::new(Iso15765Device::new(device)))
    }
}

/// Wraps an opened device; `connect` requests for the ISO 15765 protocol are
/// rewritten to plain CAN and the returned channel is wrapped in an
/// [`Iso15765Channel`].
pub struct Iso15765Device {
    inner: Box<dyn Device>,
}

impl Iso15765Device {
    pub fn new(inner: Box<dyn Device>) -> Self {
        Self { inner }
    }
}

impl Device for Iso15765Device {
    fn connect(
        &mut self,
        protocol_id: u32,
        flags: ConnectFlags,
        baudrate: u32,
    ) -> Result<Box<dyn Channel>> {
        if Protocol::from_repr(protocol_id & PROTOCOL_ID_MASK) == Some(Protocol::Iso15765) {
            let translated = (protocol_id & !PROTOCOL_ID_MASK) | Protocol::Can as u32;
            debug!("connecting ISO 15765 on top of CAN protocol {:#x}", translated);
            let channel = self.inner.connect(translated, flags, baudrate)?;
            return Ok(Box::new(Iso15765Channel::new(channel)));
        }
        self.inner.connect(protocol_id, flags, baudrate)
    }

    fn read_version(&mut self) -> Result<DeviceVersion> {
        self.inner.read_version()
    }

    fn set_programming_voltage(&mut self, pin: u32, millivolts: u32) -> Result<()> {
        self.inner.set_programming_voltage(pin, millivolts)
    }

    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        self.inner.ioctl(ioctl_id, input, output)
    }
}
