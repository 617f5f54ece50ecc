//! The pass-through API contract: the library, device and channel traits the
//! proxy consumes and implements, plus the records they exchange.

pub mod constants;
pub mod types;

pub use constants::{ConnectFlags, FilterType, Protocol, RxStatus, TxFlags};
pub use types::{DeviceVersion, FilterId, PassthruMsg, PeriodicMsgId, SConfig};

use std::time::Duration;

use crate::Result;

/// A connected pass-through channel. Implementations are blocking; batch
/// reads and writes report progress through the returned count rather than
/// aborting on per-message failures.
pub trait Channel: Send {
    /// Blocks up to `timeout` and returns at most `max` messages; an empty
    /// vector means the timeout expired.
    fn read_msgs(&mut self, max: usize, timeout: Duration) -> Result<Vec<PassthruMsg>>;

    /// Writes the batch in order and returns the number of messages written.
    fn write_msgs(&mut self, msgs: &[PassthruMsg], timeout: Duration) -> Result<usize>;

    fn start_msg_filter(
        &mut self,
        filter_type: FilterType,
        mask: Option<&PassthruMsg>,
        pattern: Option<&PassthruMsg>,
        flow_control: Option<&PassthruMsg>,
    ) -> Result<FilterId>;

    fn stop_msg_filter(&mut self, filter: FilterId) -> Result<()>;

    fn start_periodic_msg(&mut self, msg: &PassthruMsg, interval: Duration)
        -> Result<PeriodicMsgId>;

    fn stop_periodic_msg(&mut self, msg: PeriodicMsgId) -> Result<()>;

    /// Fills in the `value` of every parameter in `params`.
    fn get_config(&mut self, params: &mut [SConfig]) -> Result<()>;

    fn set_config(&mut self, params: &[SConfig]) -> Result<()>;

    fn clear_tx_buffers(&mut self) -> Result<()>;

    fn clear_rx_buffers(&mut self) -> Result<()>;

    fn clear_periodic_msgs(&mut self) -> Result<()>;

    fn clear_msg_filters(&mut self) -> Result<()>;

    /// Fall-through for ioctls not covered by a dedicated method.
    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], output: &mut Vec<u8>) -> Result<()>;
}

/// An opened pass-through device.
pub trait Device {
    fn connect(
        &mut self,
        protocol_id: u32,
        flags: ConnectFlags,
        baudrate: u32,
    ) -> Result<Box<dyn Channel>>;

    fn read_version(&mut self) -> Result<DeviceVersion>;

    fn set_programming_voltage(&mut self, pin: u32, millivolts: u32) -> Result<()>;

    fn ioctl(&mut self, ioctl_id: u32, input: &[u8], output: &mut Vec<u8>) -> Result<()>;
}

/// An entry point handing out devices.
pub trait Library {
    fn open(&mut self, name: Option<&str>) -> Result<Box<dyn Device>>;
}
