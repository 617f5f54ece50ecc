//! Message and parameter records exchanged through the pass-through API.

use std::fmt;

use crate::isotp::frame;
use crate::passthru::constants::{Protocol, RxStatus, TxFlags};

/// Capacity of a message data buffer: a 4 byte CAN identifier prefix plus up
/// to 4124 payload bytes.
pub const MAX_DATA_SIZE: usize = 4128;

/// Size of the big-endian CAN identifier prefixed to every data buffer.
pub const PID_SIZE: usize = 4;

/// A pass-through message. The first [`PID_SIZE`] data bytes hold the CAN
/// identifier, everything after is payload: a raw CAN frame carries 0 to 8
/// payload bytes, a reassembled ISO 15765 message up to 4095.
#[derive(Clone, PartialEq)]
pub struct PassthruMsg {
    pub protocol_id: Protocol,
    pub rx_status: RxStatus,
    pub tx_flags: TxFlags,
    pub timestamp: u32,
    pub extra_data_index: u32,
    pub data: Vec<u8>,
}

impl PassthruMsg {
    pub fn new(protocol_id: Protocol) -> Self {
        Self {
            protocol_id,
            rx_status: RxStatus::empty(),
            tx_flags: TxFlags::empty(),
            timestamp: 0,
            extra_data_index: 0,
            data: Vec::new(),
        }
    }

    /// A raw CAN frame message.
    pub fn can_frame(pid: u32, payload: &[u8], tx_flags: TxFlags) -> Self {
        Self::with_payload(Protocol::Can, pid, payload, tx_flags)
    }

    /// A logical ISO 15765 message of up to 4095 payload bytes.
    pub fn iso15765(pid: u32, payload: &[u8], tx_flags: TxFlags) -> Self {
        Self::with_payload(Protocol::Iso15765, pid, payload, tx_flags)
    }

    /// A 4 byte identifier-only message, as used for filter masks, patterns
    /// and flow control ids.
    pub fn filter(protocol_id: Protocol, pid: u32) -> Self {
        Self::with_payload(protocol_id, pid, &[], TxFlags::empty())
    }

    fn with_payload(protocol_id: Protocol, pid: u32, payload: &[u8], tx_flags: TxFlags) -> Self {
        let mut msg = Self::new(protocol_id);
        msg.tx_flags = tx_flags;
        msg.set_pid(pid);
        msg.data.extend_from_slice(payload);
        msg
    }

    /// The 29 bit CAN identifier packed into the first four data bytes.
    /// Returns 0 when the buffer is too short to carry an identifier.
    pub fn pid(&self) -> u32 {
        match self.data.first_chunk() {
            Some(prefix) => frame::unpack_pid(prefix),
            None => 0,
        }
    }

    pub fn set_pid(&mut self, pid: u32) {
        if self.data.len() < PID_SIZE {
            self.data.resize(PID_SIZE, 0);
        }
        self.data[..PID_SIZE].copy_from_slice(&frame::pack_pid(pid));
    }

    /// The payload bytes behind the identifier prefix.
    pub fn payload(&self) -> &[u8] {
        &self.data[PID_SIZE.min(self.data.len())..]
    }
}

impl fmt::Display for PassthruMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassthruMsg")
            .field("protocol_id", &self.protocol_id)
            .field("rx_status", &self.rx_status)
            .field("tx_flags", &self.tx_flags)
            .field("data", &hex::encode(&self.data))
            .finish()
    }
}

impl fmt::Debug for PassthruMsg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// One configuration parameter of a channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SConfig {
    pub parameter: u32,
    pub value: u32,
}

/// Version strings reported by a pass-through device.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceVersion {
    pub firmware: String,
    pub dll: String,
    pub api: String,
}

/// Handle to an installed message filter.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FilterId(pub u32);

/// Handle to a running periodic message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PeriodicMsgId(pub u32);
