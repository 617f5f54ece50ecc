//! ISO 15765-2 network layer over a raw pass-through CAN channel.
//!
//! [`Iso15765Channel`] wraps a connected CAN channel and presents the same
//! channel contract one level up: logical messages of up to 4095 bytes go in
//! and out, while the wire only ever carries 8 byte CAN frames. Installing a
//! [`FilterType::FlowControl`] filter binds a [`transfer::Transfer`] to a
//! mask/pattern/flow-control identifier triple; inbound frames are routed to
//! transfers by masked identifier match, outbound logical messages by flow
//! control identifier equality.

pub mod constants;
pub mod error;
pub mod frame;
pub mod transfer;

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::Error;
use crate::isotp::transfer::{remaining, Reassembly, Transfer};
use crate::passthru::constants::{ISO15765_ADDR_TYPE, ISO15765_BS, ISO15765_STMIN};
use crate::passthru::types::{FilterId, PassthruMsg, PeriodicMsgId, SConfig};
use crate::passthru::{Channel, FilterType, Protocol, RxStatus, TxFlags};
use crate::Result;

/// Configuration keys serviced locally by an ISO 15765 channel rather than
/// forwarded to the wrapped CAN channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelConfig {
    /// `ISO15765_BS`: block size granted in emitted flow control frames.
    pub bs: u32,
    /// `ISO15765_STMIN`: separation time granted in emitted flow control
    /// frames, milliseconds.
    pub stmin: u32,
    /// `ISO15765_ADDR_TYPE`: accepted and stored; only normal addressing is
    /// implemented.
    pub addr_type: u32,
}

impl ChannelConfig {
    fn get(&self, parameter: u32) -> Option<u32> {
        match parameter {
            ISO15765_BS => Some(self.bs),
            ISO15765_STMIN => Some(self.stmin),
            ISO15765_ADDR_TYPE => Some(self.addr_type),
            _ => None,
        }
    }

    fn set(&mut self, parameter: u32, value: u32) -> bool {
        match parameter {
            ISO15765_BS => self.bs = value,
            ISO15765_STMIN => self.stmin = value,
            ISO15765_ADDR_TYPE => self.addr_type = value,
            _ => return false,
        }
        true
    }
}

/// A flow control filter: the pass filter installed on the raw channel plus
/// the transfer bound to its identifier triple.
struct Iso15765Filter {
    id: FilterId,
    inner_id: FilterId,
    transfer: Transfer,
}

// Handles issued for flow control filters are kept out of the range the
// wrapped channel hands out, so stop requests can be told apart.
const LOCAL_FILTER_BASE: u32 = 0x8000_0000;

/// The ISO 15765 channel adapter. Owns the wrapped raw CAN channel, the
/// ordered filter registry and the locally serviced configuration.
pub struct Iso15765Channel {
    inner: Box<dyn Channel>,
    filters: Vec<Iso15765Filter>,
    config: ChannelConfig,
    next_filter_id: u32,
}

impl Iso15765Channel {
    pub fn new(inner: Box<dyn Channel>) -> Self {
        Self {
            inner,
            filters: Vec::new(),
            config: ChannelConfig::default(),
            next_filter_id: LOCAL_FILTER_BASE,
        }
    }
}

/// First installed filter whose masked pattern admits `pid`.
fn transfer_by_pattern(filters: &mut [Iso15765Filter], pid: u32) -> Option<&mut Transfer> {
    filters
        .iter_mut()
        .map(|filter| &mut filter.transfer)
        .find(|transfer| transfer.matches_pattern(pid))
}

/// First installed filter whose flow control identifier equals `pid`.
fn transfer_by_flow_control(filters: &mut [Iso15765Filter], pid: u32) -> Option<&mut Transfer> {
    filters
        .iter_mut()
        .map(|filter| &mut filter.transfer)
        .find(|transfer| transfer.matches_flow_control(pid))
}

impl Channel for Iso15765Channel {
    /// Reads CAN frames off the wrapped channel and feeds them through the
    /// matching transfers until `max` logical messages have assembled or the
    /// deadline passes. Frames matching no filter are dropped.
    fn read_msgs(&mut self, max: usize, timeout: Duration) -> Result<Vec<PassthruMsg>> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        let Self {
            inner,
            filters,
            config,
            ..
        } = self;

        'slots: while out.len() < max {
            loop {
                let left = match remaining(deadline) {
                    Some(left) => left,
                    None => break 'slots,
                };
                let frame = match inner.read_msgs(1, left)?.into_iter().next() {
                    Some(frame) => frame,
                    None => break 'slots,
                };

                match transfer_by_pattern(filters, frame.pid()) {
                    Some(transfer) => {
                        let left = deadline.saturating_duration_since(Instant::now());
                        match transfer.read_msg(&mut **inner, config, &frame, left) {
                            Ok(Reassembly::Complete(msg)) => {
                                out.push(msg);
                                continue 'slots;
                            }
                            Ok(Reassembly::Pending) => {}
                            // The transfer has already reset itself.
                            Err(err) => warn!("dropping frame: {}", err),
                        }
                    }
                    None => debug!("no matching transfer for PID {:08x}", frame.pid()),
                }
            }
        }
        Ok(out)
    }

    /// Writes each logical message through the transfer registered for its
    /// flow control identifier. Messages with no transfer are skipped, soft
    /// per-message failures are logged and not counted; only a message with
    /// no identifier prefix aborts the batch.
    fn write_msgs(&mut self, msgs: &[PassthruMsg], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut count = 0;
        let Self {
            inner, filters, ..
        } = self;

        for msg in msgs {
            let left = match remaining(deadline) {
                Some(left) => left,
                None => break,
            };
            match transfer_by_flow_control(filters, msg.pid()) {
                Some(transfer) => match transfer.write_msg(&mut **inner, msg, left) {
                    Ok(()) => count += 1,
                    Err(error::Error::InvalidMessage) => return Err(Error::InvalidMessage),
                    Err(err) => warn!("message not written: {}", err),
                },
                None => debug!("no transfer for flow control PID {:08x}, ignoring", msg.pid()),
            }
        }
        Ok(count)
    }

    fn start_msg_filter(
        &mut self,
        filter_type: FilterType,
        mask: Option<&PassthruMsg>,
        pattern: Option<&PassthruMsg>,
        flow_control: Option<&PassthruMsg>,
    ) -> Result<FilterId> {
        if filter_type != FilterType::FlowControl {
            return self
                .inner
                .start_msg_filter(filter_type, mask, pattern, flow_control);
        }

        let (mask, pattern, flow_control) = match (mask, pattern, flow_control) {
            (Some(mask), Some(pattern), Some(flow_control)) => (mask, pattern, flow_control),
            _ => return Err(Error::NullParameter),
        };

        // The raw channel sees a plain pass filter with the ISO 15765-only
        // bits stripped.
        let mut raw_mask = mask.clone();
        let mut raw_pattern = pattern.clone();
        for msg in [&mut raw_mask, &mut raw_pattern] {
            msg.protocol_id = Protocol::Can;
            msg.rx_status &=
                !(RxStatus::ISO15765_PADDING_ERROR | RxStatus::ISO15765_ADDR_TYPE);
            msg.tx_flags &= !TxFlags::ISO15765_FRAME_PAD;
        }
        let inner_id =
            self.inner
                .start_msg_filter(FilterType::Pass, Some(&raw_mask), Some(&raw_pattern), None)?;

        let transfer = Transfer::new(mask, pattern, flow_control);
        let id = FilterId(self.next_filter_id);
        self.next_filter_id += 1;
        debug!(
            "flow control filter {:?}: mask {:08x} pattern {:08x} fc {:08x}",
            id,
            transfer.mask_pid(),
            transfer.pattern_pid(),
            transfer.flow_control_pid()
        );
        self.filters.push(Iso15765Filter {
            id,
            inner_id,
            transfer,
        });
        Ok(id)
    }

    fn stop_msg_filter(&mut self, filter: FilterId) -> Result<()> {
        match self.filters.iter().position(|f| f.id == filter) {
            Some(idx) => {
                let removed = self.filters.remove(idx);
                self.inner.stop_msg_filter(removed.inner_id)
            }
            None => self.inner.stop_msg_filter(filter),
        }
    }

    fn start_periodic_msg(
        &mut self,
        msg: &PassthruMsg,
        interval: Duration,
    ) -> Result<PeriodicMsgId> {
        self.inner.start_periodic_msg(msg, interval)
    }

    fn stop_periodic_msg(&mut self, msg: PeriodicMsgId) -> Result<()> {
        self.inner.stop_periodic_msg(msg)
    }

    fn get_config(&mut self, params: &mut [SConfig]) -> Result<()> {
        for param in params.iter_mut() {
            match self.config.get(param.parameter) {
                Some(value) => param.value = value,
                None => self.inner.get_config(std::slice::from_mut(param))?,
            }
        }
        Ok(())
    }

    fn set_config(&mut self, params: &[SConfig]) -> Result<()> {
        for param in params {
            if !self.config.set(param.parameter, param.value) {
                self.inner.set_config(std::slice::from_ref(param))?;
            }
        }
        Ok(())
    }

    fn clear_tx_buffers(&mut self) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn clear_rx_buffers(&mut self) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn clear_periodic_msgs(&mut self) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn clear_msg_filters(&mut self) -> Result<()> {
        for filter in self.filters.drain(..) {
            if let Err(err) = self.inner.stop_msg_filter(filter.inner_id) {
                warn!("stopping filter {:?} failed: {}", filter.inner_id, err);
            }
        }
        Ok(())
    }

    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        self.inner.ioctl(ioctl_id, input, output)
    }
}

impl Drop for Iso15765Channel {
    fn drop(&mut self) {
        for filter in self.filters.drain(..) {
            if let Err(err) = self.inner.stop_msg_filter(filter.inner_id) {
                warn!("stopping filter {:?} failed: {}", filter.inner_id, err);
            }
        }
    }
}
