// Transport abstractions mechanism logic (`mechanism_logic.rs`, in
// `mookodi-server`) is written against: a digital I/O backend (output
// mask write, input mask read, over a serial ASCII-line protocol) and
// a linear-actuator backend (set/get position, tuning-register
// configuration, over USB bulk transfer). Grounded on the same
// capability-trait idiom as `detector_trait.rs`; the two concrete
// implementations live in `mechanism_io_serial.rs` and
// `mechanism_io_usb.rs`, with emulated counterparts in `emulation.rs`.

use async_trait::async_trait;
use canonical_error::CanonicalError;

#[async_trait]
pub trait DigitalIoBackend: Send + Sync {
    /// Writes the 8-bit solenoid/relay output mask.
    async fn set_output_mask(&self, mask: u8) -> Result<(), CanonicalError>;
    /// Reads back the 8-bit output mask as last written.
    async fn get_output_mask(&self) -> Result<u8, CanonicalError>;
    /// Reads the 8-bit limit-sensor input mask.
    async fn get_input_mask(&self) -> Result<u8, CanonicalError>;
}

#[async_trait]
impl DigitalIoBackend for Box<dyn DigitalIoBackend> {
    async fn set_output_mask(&self, mask: u8) -> Result<(), CanonicalError> {
        (**self).set_output_mask(mask).await
    }
    async fn get_output_mask(&self) -> Result<u8, CanonicalError> {
        (**self).get_output_mask().await
    }
    async fn get_input_mask(&self) -> Result<u8, CanonicalError> {
        (**self).get_input_mask().await
    }
}

/// The tuning registers `lac_conf()` programs into a linear actuator,
/// in address order. Carried through verbatim from the original
/// register set; see DESIGN.md.
#[derive(Debug, Clone, Copy)]
pub struct LacTuningRegisters {
    pub speed: i32,
    pub accuracy: i32,
    pub retract_limit: i32,
    pub extend_limit: i32,
    pub movement_threshold: i32,
    pub stall_time: i32,
    pub pwm_threshold: i32,
    pub derivative_threshold: i32,
    pub derivative_maximum: i32,
    pub derivative_minimum: i32,
    pub pwm_maximum: i32,
    pub pwm_minimum: i32,
    pub proportional_gain: i32,
    pub derivative_gain: i32,
    pub average_rc: i32,
    pub average_adc: i32,
}

#[async_trait]
pub trait LinearActuatorBackend: Send + Sync {
    /// Commands a new target position (0..1023); returns once the
    /// command has been issued, not once the actuator has settled —
    /// this is what makes two-actuator moves overlap.
    async fn set_position(&self, target: i32) -> Result<(), CanonicalError>;
    /// Reads the actuator's current feedback position.
    async fn get_position(&self) -> Result<i32, CanonicalError>;
    /// Writes every tuning register and verifies each echoed value
    /// against the requested one; any mismatch fails the whole
    /// transaction and leaves the actuator in a partially-configured
    /// state (the original has the same property: there is no
    /// transactional rollback in firmware).
    async fn configure(&self, registers: &LacTuningRegisters) -> Result<(), CanonicalError>;
}

#[async_trait]
impl LinearActuatorBackend for Box<dyn LinearActuatorBackend> {
    async fn set_position(&self, target: i32) -> Result<(), CanonicalError> {
        (**self).set_position(target).await
    }
    async fn get_position(&self) -> Result<i32, CanonicalError> {
        (**self).get_position().await
    }
    async fn configure(&self, registers: &LacTuningRegisters) -> Result<(), CanonicalError> {
        (**self).configure(registers).await
    }
}
