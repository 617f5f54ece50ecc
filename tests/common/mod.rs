#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use passthru_isotp::passthru::{
    Channel, ConnectFlags, Device, DeviceVersion, FilterId, FilterType, Library, PassthruMsg,
    PeriodicMsgId, SConfig, TxFlags,
};
use passthru_isotp::Result;

pub fn init_tracing() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();
}

/// A filter recorded by the mock channel.
pub struct InstalledFilter {
    pub id: FilterId,
    pub filter_type: FilterType,
    pub mask: Option<PassthruMsg>,
    pub pattern: Option<PassthruMsg>,
    pub flow_control: Option<PassthruMsg>,
}

/// Plays the remote peer of an outbound transfer: answers a First Frame with
/// a flow control grant and re-arms after every completed block.
pub struct FlowControlResponder {
    pub pid: u32,
    pub bs: u8,
    pub stmin: u8,
    pub sent: u32,
    left_in_block: u32,
}

impl FlowControlResponder {
    pub fn new(pid: u32, bs: u8, stmin: u8) -> Self {
        Self {
            pid,
            bs,
            stmin,
            sent: 0,
            left_in_block: 0,
        }
    }

    fn block(&self) -> u32 {
        if self.bs == 0 {
            u32::MAX
        } else {
            self.bs as u32
        }
    }

    fn observe(&mut self, frame: &PassthruMsg) -> Option<PassthruMsg> {
        let pci = *frame.data.get(4)?;
        match pci & 0xf0 {
            0x10 => {
                self.left_in_block = self.block();
                self.sent += 1;
                Some(self.flow_control())
            }
            0x20 => {
                self.left_in_block = self.left_in_block.saturating_sub(1);
                if self.left_in_block == 0 {
                    self.left_in_block = self.block();
                    self.sent += 1;
                    Some(self.flow_control())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn flow_control(&self) -> PassthruMsg {
        PassthruMsg::can_frame(
            self.pid,
            &[0x30, self.bs, self.stmin, 0, 0, 0, 0, 0],
            TxFlags::empty(),
        )
    }
}

#[derive(Default)]
pub struct MockState {
    pub rx: VecDeque<PassthruMsg>,
    pub written: Vec<PassthruMsg>,
    pub filters: Vec<InstalledFilter>,
    pub stopped: Vec<FilterId>,
    pub periodic: Vec<(PassthruMsg, Duration)>,
    pub stopped_periodic: Vec<PeriodicMsgId>,
    pub set_config_calls: Vec<Vec<SConfig>>,
    pub get_config_calls: Vec<Vec<u32>>,
    pub ioctl_calls: Vec<(u32, Vec<u8>)>,
    pub responder: Option<FlowControlResponder>,
    pub fail_writes: bool,
    next_filter_id: u32,
}

/// In-memory stand-in for a raw pass-through CAN channel. Cloning shares the
/// state, so tests keep a handle for scripting and assertions after the
/// channel has been boxed away.
#[derive(Clone, Default)]
pub struct MockChannel(pub Arc<Mutex<MockState>>);

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<Mutex<MockState>> {
        self.0.clone()
    }

    pub fn push_rx(&self, msg: PassthruMsg) {
        self.0.lock().unwrap().rx.push_back(msg);
    }
}

impl Channel for MockChannel {
    fn read_msgs(&mut self, max: usize, _timeout: Duration) -> Result<Vec<PassthruMsg>> {
        let mut state = self.0.lock().unwrap();
        let mut out = Vec::new();
        while out.len() < max {
            match state.rx.pop_front() {
                Some(msg) => out.push(msg),
                None => break,
            }
        }
        Ok(out)
    }

    fn write_msgs(&mut self, msgs: &[PassthruMsg], _timeout: Duration) -> Result<usize> {
        let mut state = self.0.lock().unwrap();
        if state.fail_writes {
            return Ok(0);
        }
        for msg in msgs {
            state.written.push(msg.clone());
            let fc = state.responder.as_mut().and_then(|r| r.observe(msg));
            if let Some(fc) = fc {
                state.rx.push_back(fc);
            }
        }
        Ok(msgs.len())
    }

    fn start_msg_filter(
        &mut self,
        filter_type: FilterType,
        mask: Option<&PassthruMsg>,
        pattern: Option<&PassthruMsg>,
        flow_control: Option<&PassthruMsg>,
    ) -> Result<FilterId> {
        let mut state = self.0.lock().unwrap();
        state.next_filter_id += 1;
        let id = FilterId(state.next_filter_id);
        state.filters.push(InstalledFilter {
            id,
            filter_type,
            mask: mask.cloned(),
            pattern: pattern.cloned(),
            flow_control: flow_control.cloned(),
        });
        Ok(id)
    }

    fn stop_msg_filter(&mut self, filter: FilterId) -> Result<()> {
        self.0.lock().unwrap().stopped.push(filter);
        Ok(())
    }

    fn start_periodic_msg(
        &mut self,
        msg: &PassthruMsg,
        interval: Duration,
    ) -> Result<PeriodicMsgId> {
        let mut state = self.0.lock().unwrap();
        let id = PeriodicMsgId(state.periodic.len() as u32);
        state.periodic.push((msg.clone(), interval));
        Ok(id)
    }

    fn stop_periodic_msg(&mut self, msg: PeriodicMsgId) -> Result<()> {
        self.0.lock().unwrap().stopped_periodic.push(msg);
        Ok(())
    }

    fn get_config(&mut self, params: &mut [SConfig]) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state
            .get_config_calls
            .push(params.iter().map(|p| p.parameter).collect());
        for param in params.iter_mut() {
            param.value = 0;
        }
        Ok(())
    }

    fn set_config(&mut self, params: &[SConfig]) -> Result<()> {
        self.0.lock().unwrap().set_config_calls.push(params.to_vec());
        Ok(())
    }

    fn clear_tx_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_rx_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_periodic_msgs(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_msg_filters(&mut self) -> Result<()> {
        Ok(())
    }

    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], _output: &mut Vec<u8>) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .ioctl_calls
            .push((ioctl_id, input.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDeviceState {
    pub connects: Vec<(u32, ConnectFlags, u32)>,
    pub channels: Vec<Arc<Mutex<MockState>>>,
    pub voltage_calls: Vec<(u32, u32)>,
    pub ioctl_calls: Vec<(u32, Vec<u8>)>,
}

#[derive(Clone, Default)]
pub struct MockDevice(pub Arc<Mutex<MockDeviceState>>);

impl Device for MockDevice {
    fn connect(
        &mut self,
        protocol_id: u32,
        flags: ConnectFlags,
        baudrate: u32,
    ) -> Result<Box<dyn Channel>> {
        let channel = MockChannel::new();
        let mut state = self.0.lock().unwrap();
        state.connects.push((protocol_id, flags, baudrate));
        state.channels.push(channel.state());
        Ok(Box::new(channel))
    }

    fn read_version(&mut self) -> Result<DeviceVersion> {
        Ok(DeviceVersion {
            firmware: "1.0".into(),
            dll: "mock".into(),
            api: "04.04".into(),
        })
    }

    fn set_programming_voltage(&mut self, pin: u32, millivolts: u32) -> Result<()> {
        self.0.lock().unwrap().voltage_calls.push((pin, millivolts));
        Ok(())
    }

    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], _output: &mut Vec<u8>) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .ioctl_calls
            .push((ioctl_id, input.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockLibraryState {
    pub opens: Vec<Option<String>>,
    pub devices: Vec<Arc<Mutex<MockDeviceState>>>,
}

#[derive(Clone, Default)]
pub struct MockLibrary(pub Arc<Mutex<MockLibraryState>>);

impl Library for MockLibrary {
    fn open(&mut self, name: Option<&str>) -> Result<Box<dyn Device>> {
        let device = MockDevice::default();
        let mut state = self.0.lock().unwrap();
        state.opens.push(name.map(str::to_owned));
        state.devices.push(device.0.clone());
        Ok(Box::new(device))
    }
}

struct BusState {
    a_to_b: VecDeque<PassthruMsg>,
    b_to_a: VecDeque<PassthruMsg>,
}

/// One side of a blocking in-memory CAN bus. Frames written on one endpoint
/// become readable on the other; reads block up to their timeout.
pub struct LoopbackEndpoint {
    shared: Arc<(Mutex<BusState>, Condvar)>,
    a_side: bool,
    next_filter_id: u32,
}

pub fn loopback_pair() -> (LoopbackEndpoint, LoopbackEndpoint) {
    let shared = Arc::new((
        Mutex::new(BusState {
            a_to_b: VecDeque::new(),
            b_to_a: VecDeque::new(),
        }),
        Condvar::new(),
    ));
    (
        LoopbackEndpoint {
            shared: shared.clone(),
            a_side: true,
            next_filter_id: 0,
        },
        LoopbackEndpoint {
            shared,
            a_side: false,
            next_filter_id: 0,
        },
    )
}

impl Channel for LoopbackEndpoint {
    fn read_msgs(&mut self, max: usize, timeout: Duration) -> Result<Vec<PassthruMsg>> {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();
        loop {
            let queue = if self.a_side {
                &mut state.b_to_a
            } else {
                &mut state.a_to_b
            };
            if !queue.is_empty() {
                let mut out = Vec::new();
                while out.len() < max {
                    match queue.pop_front() {
                        Some(msg) => out.push(msg),
                        None => break,
                    }
                }
                return Ok(out);
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(Vec::new());
            }
            state = cvar.wait_timeout(state, left).unwrap().0;
        }
    }

    fn write_msgs(&mut self, msgs: &[PassthruMsg], _timeout: Duration) -> Result<usize> {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();
        let queue = if self.a_side {
            &mut state.a_to_b
        } else {
            &mut state.b_to_a
        };
        for msg in msgs {
            queue.push_back(msg.clone());
        }
        cvar.notify_all();
        Ok(msgs.len())
    }

    fn start_msg_filter(
        &mut self,
        _filter_type: FilterType,
        _mask: Option<&PassthruMsg>,
        _pattern: Option<&PassthruMsg>,
        _flow_control: Option<&PassthruMsg>,
    ) -> Result<FilterId> {
        self.next_filter_id += 1;
        Ok(FilterId(self.next_filter_id))
    }

    fn stop_msg_filter(&mut self, _filter: FilterId) -> Result<()> {
        Ok(())
    }

    fn start_periodic_msg(
        &mut self,
        _msg: &PassthruMsg,
        _interval: Duration,
    ) -> Result<PeriodicMsgId> {
        Ok(PeriodicMsgId(0))
    }

    fn stop_periodic_msg(&mut self, _msg: PeriodicMsgId) -> Result<()> {
        Ok(())
    }

    fn get_config(&mut self, params: &mut [SConfig]) -> Result<()> {
        for param in params.iter_mut() {
            param.value = 0;
        }
        Ok(())
    }

    fn set_config(&mut self, _params: &[SConfig]) -> Result<()> {
        Ok(())
    }

    fn clear_tx_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_rx_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_periodic_msgs(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_msg_filters(&mut self) -> Result<()> {
        Ok(())
    }

    fn ioctl(&mut self, _ioctl_id: u32, _input: &[u8], _output: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}
