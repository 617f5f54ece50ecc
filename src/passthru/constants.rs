//! Numeric identifiers and flag words of the pass-through API.

use bitflags::bitflags;
use strum_macros::FromRepr;

/// Low 13 bits of a connect protocol id select the protocol; the upper bits
/// carry vendor extensions and are preserved across translation.
pub const PROTOCOL_ID_MASK: u32 = 0x1FFF;

/// Protocols a pass-through device can be asked to connect.
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromRepr)]
#[repr(u32)]
pub enum Protocol {
    J1850Vpw = 1,
    J1850Pwm = 2,
    Iso9141 = 3,
    Iso14230 = 4,
    Can = 5,
    Iso15765 = 6,
    SciAEngine = 7,
    SciATrans = 8,
}

/// Filter types accepted by `start_msg_filter`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromRepr)]
#[repr(u32)]
pub enum FilterType {
    Pass = 1,
    Block = 2,
    FlowControl = 3,
}

// Ioctl ids
pub const GET_CONFIG: u32 = 0x01;
pub const SET_CONFIG: u32 = 0x02;
pub const READ_VBATT: u32 = 0x03;
pub const FIVE_BAUD_INIT: u32 = 0x04;
pub const FAST_INIT: u32 = 0x05;
pub const CLEAR_TX_BUFFER: u32 = 0x07;
pub const CLEAR_RX_BUFFER: u32 = 0x08;
pub const CLEAR_PERIODIC_MSGS: u32 = 0x09;
pub const CLEAR_MSG_FILTERS: u32 = 0x0A;

// Config parameter ids
pub const DATA_RATE: u32 = 0x01;
pub const LOOPBACK: u32 = 0x03;
pub const NODE_ADDRESS: u32 = 0x04;
pub const NETWORK_LINE: u32 = 0x05;
pub const P1_MIN: u32 = 0x06;
pub const P1_MAX: u32 = 0x07;
pub const P2_MIN: u32 = 0x08;
pub const P2_MAX: u32 = 0x09;
pub const P3_MIN: u32 = 0x0A;
pub const P3_MAX: u32 = 0x0B;
pub const P4_MIN: u32 = 0x0C;
pub const P4_MAX: u32 = 0x0D;
pub const ISO15765_BS: u32 = 0x1E;
pub const ISO15765_STMIN: u32 = 0x1F;
pub const ISO15765_WFT_MAX: u32 = 0x24;
pub const ISO15765_ADDR_TYPE: u32 = 0x80;

bitflags! {
    /// Receive status word of a pass-through message.
    pub struct RxStatus: u32 {
        const TX_MSG_TYPE = 0x0001;
        const START_OF_MESSAGE = 0x0002;
        const RX_BREAK = 0x0004;
        const TX_INDICATION = 0x0008;
        const ISO15765_PADDING_ERROR = 0x0010;
        const ISO15765_ADDR_TYPE = 0x0080;
        const CAN_29BIT_ID = 0x0100;
    }

    /// Transmit flags word of a pass-through message.
    pub struct TxFlags: u32 {
        const ISO15765_FRAME_PAD = 0x0040;
        const ISO15765_ADDR_TYPE = 0x0080;
        const CAN_29BIT_ID = 0x0100;
        const WAIT_P3_MIN_ONLY = 0x0200;
    }

    /// Flag word passed to `connect`.
    pub struct ConnectFlags: u32 {
        const CAN_29BIT_ID = 0x0100;
        const ISO9141_NO_CHECKSUM = 0x0200;
        const CAN_ID_BOTH = 0x0800;
    }
}
