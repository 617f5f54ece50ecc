//! Per-filter ISO 15765-2 transfer state machine: segmentation of outbound
//! logical messages and reassembly of inbound frame sequences.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::isotp::constants::{
    FrameType, CAN_DATA_SIZE, CF_DATA_SIZE, FF_DATA_SIZE, MAX_TRANSFER_SIZE, PCI_SIZE,
    SEQUENCE_MASK,
};
use crate::isotp::error::Error;
use crate::isotp::frame::{frame_kind, pad_to_can, pci_byte};
use crate::isotp::ChannelConfig;
use crate::passthru::types::{PassthruMsg, PID_SIZE};
use crate::passthru::{Channel, Protocol, RxStatus, TxFlags};

/// Reassembly progress reported by [`Transfer::read_msg`].
#[derive(Debug)]
pub enum Reassembly {
    /// The frame completed a logical message.
    Complete(PassthruMsg),
    /// More consecutive frames are needed.
    Pending,
}

/// Transfer state. The idle variant carries no fields, so a cleared transfer
/// cannot hold a stale cursor or sequence counter.
enum State {
    Start,
    Receiving {
        buffer: PassthruMsg,
        total: usize,
        sequence: u8,
        bs: u32,
    },
}

/// One in-flight segmented message, bound to a mask/pattern/flow-control
/// identifier triple. A transfer services one direction at a time.
pub struct Transfer {
    mask_pid: u32,
    pattern_pid: u32,
    flow_control_pid: u32,
    state: State,
}

impl Transfer {
    pub fn new(mask: &PassthruMsg, pattern: &PassthruMsg, flow_control: &PassthruMsg) -> Self {
        Self {
            mask_pid: mask.pid(),
            pattern_pid: pattern.pid(),
            flow_control_pid: flow_control.pid(),
            state: State::Start,
        }
    }

    pub fn mask_pid(&self) -> u32 {
        self.mask_pid
    }

    pub fn pattern_pid(&self) -> u32 {
        self.pattern_pid
    }

    pub fn flow_control_pid(&self) -> u32 {
        self.flow_control_pid
    }

    /// Drops any in-flight transfer and returns to the idle state.
    pub fn clear(&mut self) {
        self.state = State::Start;
    }

    pub fn matches_pattern(&self, pid: u32) -> bool {
        pid & self.mask_pid == self.pattern_pid
    }

    pub fn matches_flow_control(&self, pid: u32) -> bool {
        pid == self.flow_control_pid
    }

    /// Segments one logical message into CAN frames and drives the flow
    /// control handshake. Blocks on the calling thread until the transfer
    /// completes or the deadline passes; the transfer is idle again on
    /// return, successful or not.
    pub fn write_msg(
        &mut self,
        channel: &mut dyn Channel,
        msg: &PassthruMsg,
        timeout: Duration,
    ) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;

        if msg.data.len() < PID_SIZE {
            return Err(Error::InvalidMessage);
        }
        if msg.data.len() - PID_SIZE > MAX_TRANSFER_SIZE {
            return Err(Error::DataTooLarge);
        }
        if !matches!(self.state, State::Start) {
            warn!("write while a transfer is in flight, resetting");
            self.clear();
            return Err(Error::TransferInProgress);
        }

        let payload = &msg.data[PID_SIZE..];
        debug!("TX {}", hex::encode(payload));

        if payload.len() <= CF_DATA_SIZE {
            let mut frame = prepare_sent(msg);
            frame.data.push(pci_byte(FrameType::Single) | payload.len() as u8);
            frame.data.extend_from_slice(payload);
            debug!("TX SF, length: {} data {}", payload.len(), hex::encode(&frame.data));
            write_frame(channel, frame, msg.tx_flags, deadline)?;
            return Ok(());
        }

        let mut frame = prepare_sent(msg);
        frame
            .data
            .push(pci_byte(FrameType::First) | ((payload.len() >> 8) & 0x0f) as u8);
        frame.data.push((payload.len() & 0xff) as u8);
        frame.data.extend_from_slice(&payload[..FF_DATA_SIZE]);
        debug!("TX FF, length: {} data {}", payload.len(), hex::encode(&frame.data));
        write_frame(channel, frame, msg.tx_flags, deadline)?;

        let mut offset = FF_DATA_SIZE;
        let mut sequence: u8 = 1;

        while offset < payload.len() {
            let (mut bs, stmin) = self.read_flow_control(channel, deadline)?;
            sleep_separation(stmin);

            loop {
                let chunk = (payload.len() - offset).min(CF_DATA_SIZE);
                let mut frame = prepare_sent(msg);
                frame
                    .data
                    .push(pci_byte(FrameType::Consecutive) | (sequence & SEQUENCE_MASK));
                frame
                    .data
                    .extend_from_slice(&payload[offset..offset + chunk]);
                debug!(
                    "TX CF, idx: {} data {}",
                    sequence & SEQUENCE_MASK,
                    hex::encode(&frame.data)
                );
                write_frame(channel, frame, msg.tx_flags, deadline)?;
                sequence = sequence.wrapping_add(1);
                offset += chunk;

                if offset >= payload.len() {
                    return Ok(());
                }
                // A granted block size of zero never exhausts.
                bs = bs.wrapping_sub(1);
                if bs == 0 {
                    break;
                }
                sleep_separation(stmin);
            }
        }
        Ok(())
    }

    /// Feeds one CAN frame, already matched to this transfer by identifier,
    /// into the reassembly machine. Any protocol violation resets the
    /// transfer to idle before the error is returned.
    pub fn read_msg(
        &mut self,
        channel: &mut dyn Channel,
        config: &ChannelConfig,
        frame: &PassthruMsg,
        timeout: Duration,
    ) -> Result<Reassembly, Error> {
        if frame.data.len() < PID_SIZE + PCI_SIZE {
            self.clear();
            return Err(Error::MalformedFrame);
        }
        if !self.matches_pattern(frame.pid()) {
            self.clear();
            return Err(Error::FilterMismatch);
        }

        let pci = frame.data[PID_SIZE];
        let kind = frame_kind(pci);

        // Taking the state out resets the transfer; it is put back only on
        // a well-formed pending frame.
        match std::mem::replace(&mut self.state, State::Start) {
            State::Start => match kind {
                Some(FrameType::Single) => {
                    let len = (pci & SEQUENCE_MASK) as usize;
                    if len > CF_DATA_SIZE || frame.data.len() < PID_SIZE + PCI_SIZE + len {
                        return Err(Error::MalformedFrame);
                    }
                    debug!("RX SF, length: {} data {}", len, hex::encode(&frame.data));
                    let mut buffer = prepare_received(frame);
                    buffer
                        .data
                        .extend_from_slice(&frame.data[PID_SIZE + PCI_SIZE..PID_SIZE + PCI_SIZE + len]);
                    Ok(Reassembly::Complete(buffer))
                }
                Some(FrameType::First) => {
                    if frame.data.len() < PID_SIZE + CAN_DATA_SIZE {
                        return Err(Error::MalformedFrame);
                    }
                    let total =
                        (((pci & 0x0f) as usize) << 8) | frame.data[PID_SIZE + PCI_SIZE] as usize;
                    debug!("RX FF, length: {} data {}", total, hex::encode(&frame.data));

                    let mut buffer = prepare_received(frame);
                    buffer.data.reserve(total);
                    let take = total.min(FF_DATA_SIZE);
                    buffer
                        .data
                        .extend_from_slice(&frame.data[PID_SIZE + 2..PID_SIZE + 2 + take]);

                    // The flow control goes out even when the First Frame
                    // already carried the whole announced length.
                    let bs = self.send_flow_control(channel, config, timeout)?;
                    if buffer.data.len() - PID_SIZE >= total {
                        return Ok(Reassembly::Complete(buffer));
                    }
                    self.state = State::Receiving {
                        buffer,
                        total,
                        sequence: 1,
                        bs,
                    };
                    Ok(Reassembly::Pending)
                }
                None => Err(Error::UnknownFrameType),
                Some(other) => {
                    warn!("unexpected {:?} frame while idle", other);
                    Err(Error::UnexpectedFrameType)
                }
            },
            State::Receiving {
                mut buffer,
                total,
                sequence,
                bs,
            } => {
                match kind {
                    Some(FrameType::Consecutive) => {}
                    Some(other) => {
                        warn!("expected consecutive frame, got {:?}", other);
                        return Err(Error::UnexpectedFrameType);
                    }
                    None => {
                        warn!("expected consecutive frame, got unknown PCI {:#04x}", pci);
                        return Err(Error::UnknownFrameType);
                    }
                }
                let seq = pci & SEQUENCE_MASK;
                if seq != sequence & SEQUENCE_MASK {
                    warn!(
                        "wrong sequence number {} (expected {})",
                        seq,
                        sequence & SEQUENCE_MASK
                    );
                    return Err(Error::OutOfOrder);
                }

                let received = buffer.data.len() - PID_SIZE;
                let chunk = (total - received).min(CF_DATA_SIZE);
                if frame.data.len() < PID_SIZE + PCI_SIZE + chunk {
                    return Err(Error::MalformedFrame);
                }
                buffer
                    .data
                    .extend_from_slice(&frame.data[PID_SIZE + PCI_SIZE..PID_SIZE + PCI_SIZE + chunk]);
                debug!("RX CF, idx: {} data {}", seq, hex::encode(&frame.data));

                let sequence = sequence.wrapping_add(1);
                let mut bs = bs.wrapping_sub(1);
                if bs == 0 {
                    bs = self.send_flow_control(channel, config, timeout)?;
                }

                if buffer.data.len() - PID_SIZE >= total {
                    Ok(Reassembly::Complete(buffer))
                } else {
                    self.state = State::Receiving {
                        buffer,
                        total,
                        sequence,
                        bs,
                    };
                    Ok(Reassembly::Pending)
                }
            }
        }
    }

    /// Emits a flow control frame granting the peer the configured block.
    /// Returns the granted block size.
    fn send_flow_control(
        &self,
        channel: &mut dyn Channel,
        config: &ChannelConfig,
        timeout: Duration,
    ) -> Result<u32, Error> {
        let mut frame = PassthruMsg::can_frame(self.flow_control_pid, &[], TxFlags::empty());
        frame.data.push(pci_byte(FrameType::FlowControl));
        frame.data.push(config.bs as u8);
        frame.data.push(config.stmin as u8);
        pad_to_can(&mut frame);

        debug!(
            "TX FC, bs: {} stmin: {} data {}",
            config.bs,
            config.stmin,
            hex::encode(&frame.data)
        );
        match channel.write_msgs(std::slice::from_ref(&frame), timeout) {
            Ok(1) => Ok(config.bs),
            Ok(n) => {
                warn!("flow control write reported {} frames", n);
                Err(Error::WriteFailed)
            }
            Err(err) => {
                warn!("flow control write failed: {}", err);
                Err(Error::WriteFailed)
            }
        }
    }

    /// Blocks for the peer's flow control frame and returns (block size,
    /// separation time).
    fn read_flow_control(
        &self,
        channel: &mut dyn Channel,
        deadline: Instant,
    ) -> Result<(u32, u8), Error> {
        let timeout = remaining(deadline).ok_or(Error::Timeout)?;
        let frames = match channel.read_msgs(1, timeout) {
            Ok(frames) => frames,
            Err(err) => {
                warn!("flow control read failed: {}", err);
                return Err(Error::Timeout);
            }
        };
        let frame = match frames.into_iter().next() {
            Some(frame) => frame,
            None => return Err(Error::Timeout),
        };

        if frame.data.len() < PID_SIZE + PCI_SIZE + 2 {
            return Err(Error::MalformedFrame);
        }
        if !self.matches_pattern(frame.pid()) {
            warn!("flow control PID {:08x} does not match filter", frame.pid());
            return Err(Error::FilterMismatch);
        }
        match frame_kind(frame.data[PID_SIZE]) {
            Some(FrameType::FlowControl) => {}
            Some(other) => {
                warn!("expected flow control, got {:?}", other);
                return Err(Error::UnexpectedFrameType);
            }
            None => {
                warn!("expected flow control, got unknown PCI");
                return Err(Error::UnknownFrameType);
            }
        }

        let bs = frame.data[PID_SIZE + PCI_SIZE] as u32;
        let stmin = frame.data[PID_SIZE + PCI_SIZE + 1];
        debug!("RX FC, bs: {} stmin: {}", bs, stmin);
        Ok((bs, stmin))
    }
}

/// CAN frame template for one emitted segment: the logical message's
/// identifier bytes, the ISO 15765 transmit bits stripped.
fn prepare_sent(src: &PassthruMsg) -> PassthruMsg {
    PassthruMsg {
        protocol_id: Protocol::Can,
        rx_status: RxStatus::empty(),
        tx_flags: src.tx_flags & !(TxFlags::ISO15765_FRAME_PAD | TxFlags::ISO15765_ADDR_TYPE),
        timestamp: 0,
        extra_data_index: 0,
        data: src.data[..PID_SIZE].to_vec(),
    }
}

/// Accumulator for a reassembled message, headed with the identifier bytes
/// of the frame that opened the transfer.
fn prepare_received(frame: &PassthruMsg) -> PassthruMsg {
    PassthruMsg {
        protocol_id: Protocol::Iso15765,
        rx_status: frame.rx_status,
        tx_flags: TxFlags::empty(),
        timestamp: 0,
        extra_data_index: 0,
        data: frame.data[..PID_SIZE].to_vec(),
    }
}

fn write_frame(
    channel: &mut dyn Channel,
    mut frame: PassthruMsg,
    flags: TxFlags,
    deadline: Instant,
) -> Result<(), Error> {
    if flags.contains(TxFlags::ISO15765_FRAME_PAD) {
        pad_to_can(&mut frame);
    }
    let timeout = remaining(deadline).ok_or(Error::Timeout)?;
    match channel.write_msgs(std::slice::from_ref(&frame), timeout) {
        Ok(1) => Ok(()),
        Ok(n) => {
            warn!("channel wrote {} frames instead of 1", n);
            Err(Error::WriteFailed)
        }
        Err(err) => {
            warn!("channel write failed: {}", err);
            Err(Error::WriteFailed)
        }
    }
}

fn sleep_separation(stmin: u8) {
    if stmin > 0 {
        std::thread::sleep(Duration::from_millis(stmin as u64));
    }
}

/// Time left until `deadline`, or `None` once it has passed.
pub(crate) fn remaining(deadline: Instant) -> Option<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        None
    } else {
        Some(left)
    }
}
