//! # The Pass-Through ISO-TP Crate
//! A transparent proxy that adds the ISO 15765-2 network layer (multi-frame
//! segmentation and reassembly, flow control) on top of a raw CAN channel
//! exposed through a J2534-style pass-through API. Clients read and write
//! logical messages of up to 4095 bytes; the proxy fragments them into First
//! and Consecutive Frames, drives the flow control handshake, and reassembles
//! inbound sequences back into single messages.
//!
//! ## Example
//!
//! Wrap any [`passthru::Library`] implementation; channels connected with the
//! ISO 15765 protocol are transparently upgraded:
//!
//! ```rust
//! use std::time::Duration;
//!
//! use passthru_isotp::passthru::{
//!     Channel, ConnectFlags, Device, FilterType, Library, PassthruMsg, Protocol, TxFlags,
//! };
//! use passthru_isotp::proxy::Iso15765Library;
//!
//! fn read_vin(lib: Box<dyn Library>) -> passthru_isotp::Result<()> {
//!     let mut lib = Iso15765Library::new(lib);
//!     let mut device = lib.open(None)?;
//!     let mut channel =
//!         device.connect(Protocol::Iso15765 as u32, ConnectFlags::empty(), 500_000)?;
//!
//!     let mask = PassthruMsg::filter(Protocol::Iso15765, 0x1fff_ffff);
//!     let pattern = PassthruMsg::filter(Protocol::Iso15765, 0x7e8);
//!     let flow_control = PassthruMsg::filter(Protocol::Iso15765, 0x7e0);
//!     channel.start_msg_filter(
//!         FilterType::FlowControl,
//!         Some(&mask),
//!         Some(&pattern),
//!         Some(&flow_control),
//!     )?;
//!
//!     let request = PassthruMsg::iso15765(0x7e0, &[0x22, 0xf1, 0x90], TxFlags::ISO15765_FRAME_PAD);
//!     channel.write_msgs(&[request], Duration::from_millis(100))?;
//!     let _responses = channel.read_msgs(1, Duration::from_millis(1000))?;
//!     Ok(())
//! }
//! ```

mod error;
pub mod isotp;
pub mod passthru;
pub mod proxy;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
