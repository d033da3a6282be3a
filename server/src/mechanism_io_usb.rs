// Linear-actuator backend: USB bulk transfer to a Microchip-based
// custom controller board. Grounded on mkd_lac.cpp's `lac_xfer`/
// `lac_open`/`lac_conf` and the register addresses in mkd.h: each
// transfer writes a 3-byte OUT packet `(addr, val_lo, val_hi)` then
// reads a 3-byte IN packet echoing back the value the board actually
// holds at that address; `lac_xfer`'s return value is that echoed
// value, used both to verify a configuration write and to read back
// position feedback.

use std::time::Duration;

use async_trait::async_trait;
use rusb::{DeviceHandle, GlobalContext};
use tokio::sync::Mutex;

use mookodi_elements::error::hardware_error;
use mookodi_elements::mechanism_trait::{LacTuningRegisters, LinearActuatorBackend};
use canonical_error::CanonicalError;

pub const LAC_VID: u16 = 0x04D8;
pub const LAC_PID: u16 = 0xFC5F;

const ENDPOINT_OUT: u8 = 0x01;
const ENDPOINT_IN: u8 = 0x81;
const USB_TIMEOUT: Duration = Duration::from_millis(1000);

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum LacRegister {
    SetAccuracy = 0x01,
    SetRetractLimit = 0x02,
    SetExtendLimit = 0x03,
    SetMovementThreshold = 0x04,
    SetStallTime = 0x05,
    SetPwmThreshold = 0x06,
    SetDerivativeThreshold = 0x07,
    SetDerivativeMaximum = 0x08,
    SetDerivativeMinimum = 0x09,
    SetPwmMaximum = 0x0A,
    SetPwmMinimum = 0x0B,
    SetProportionalGain = 0x0C,
    SetDerivativeGain = 0x0D,
    SetAverageRc = 0x0E,
    SetAverageAdc = 0x0F,
    GetFeedback = 0x10,
    SetPosition = 0x20,
    SetSpeed = 0x21,
}

pub struct UsbLinearActuator {
    handle: Mutex<DeviceHandle<GlobalContext>>,
}

impl UsbLinearActuator {
    /// Opens the `index`'th LAC device found by vendor/product ID
    /// (0 or 1; the board enumerates two independent USB devices for
    /// the slit/grism actuator pair) and claims its interface.
    pub fn open(index: usize) -> Result<Self, CanonicalError> {
        let devices = rusb::devices()
            .map_err(|e| hardware_error("enumerating USB devices", &e.to_string()))?;
        let mut matches = devices.iter().filter(|d| {
            d.device_descriptor().map(|desc| {
                desc.vendor_id() == LAC_VID && desc.product_id() == LAC_PID
            }).unwrap_or(false)
        });
        let device = matches.nth(index).ok_or_else(|| hardware_error(
            "finding LAC device", &format!("index {} not found among LAC USB devices", index)))?;
        let mut handle = device.open()
            .map_err(|e| hardware_error("opening LAC USB device", &e.to_string()))?;
        handle.claim_interface(0)
            .map_err(|e| hardware_error("claiming LAC USB interface", &e.to_string()))?;
        Ok(UsbLinearActuator { handle: Mutex::new(handle) })
    }

    async fn xfer(&self, register: LacRegister, value: i32) -> Result<i32, CanonicalError> {
        let handle = self.handle.lock().await;
        let out = [register as u8, (value & 0xFF) as u8, ((value >> 8) & 0xFF) as u8];
        handle.write_bulk(ENDPOINT_OUT, &out, USB_TIMEOUT)
            .map_err(|e| hardware_error(
                &format!("writing LAC register 0x{:02X}", register as u8), &e.to_string()))?;

        let mut reply = [0u8; 3];
        handle.read_bulk(ENDPOINT_IN, &mut reply, USB_TIMEOUT)
            .map_err(|e| hardware_error(
                &format!("reading LAC reply for register 0x{:02X}", register as u8), &e.to_string()))?;
        Ok((reply[1] as i32) | ((reply[2] as i32) << 8))
    }

    async fn xfer_and_verify(&self, register: LacRegister, value: i32) -> Result<(), CanonicalError> {
        let echoed = self.xfer(register, value).await?;
        if echoed != value {
            return Err(hardware_error(
                &format!("configuring LAC register 0x{:02X}", register as u8),
                &format!("requested {}, board echoed {}", value, echoed)));
        }
        Ok(())
    }
}

#[async_trait]
impl LinearActuatorBackend for UsbLinearActuator {
    async fn set_position(&self, target: i32) -> Result<(), CanonicalError> {
        self.xfer(LacRegister::SetPosition, target).await?;
        Ok(())
    }

    async fn get_position(&self) -> Result<i32, CanonicalError> {
        self.xfer(LacRegister::GetFeedback, 0).await
    }

    /// Writes every tuning register and verifies each echoed value;
    /// any single mismatch fails the whole transaction.
    async fn configure(&self, registers: &LacTuningRegisters) -> Result<(), CanonicalError> {
        self.xfer_and_verify(LacRegister::SetSpeed, registers.speed).await?;
        self.xfer_and_verify(LacRegister::SetAccuracy, registers.accuracy).await?;
        self.xfer_and_verify(LacRegister::SetRetractLimit, registers.retract_limit).await?;
        self.xfer_and_verify(LacRegister::SetExtendLimit, registers.extend_limit).await?;
        self.xfer_and_verify(LacRegister::SetMovementThreshold, registers.movement_threshold).await?;
        self.xfer_and_verify(LacRegister::SetStallTime, registers.stall_time).await?;
        self.xfer_and_verify(LacRegister::SetPwmThreshold, registers.pwm_threshold).await?;
        self.xfer_and_verify(LacRegister::SetDerivativeThreshold, registers.derivative_threshold).await?;
        self.xfer_and_verify(LacRegister::SetDerivativeMaximum, registers.derivative_maximum).await?;
        self.xfer_and_verify(LacRegister::SetDerivativeMinimum, registers.derivative_minimum).await?;
        self.xfer_and_verify(LacRegister::SetPwmMaximum, registers.pwm_maximum).await?;
        self.xfer_and_verify(LacRegister::SetPwmMinimum, registers.pwm_minimum).await?;
        self.xfer_and_verify(LacRegister::SetProportionalGain, registers.proportional_gain).await?;
        self.xfer_and_verify(LacRegister::SetDerivativeGain, registers.derivative_gain).await?;
        self.xfer_and_verify(LacRegister::SetAverageRc, registers.average_rc).await?;
        self.xfer_and_verify(LacRegister::SetAverageAdc, registers.average_adc).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_addresses_match_the_board_map() {
        assert_eq!(LacRegister::SetAccuracy as u8, 0x01);
        assert_eq!(LacRegister::GetFeedback as u8, 0x10);
        assert_eq!(LacRegister::SetPosition as u8, 0x20);
        assert_eq!(LacRegister::SetSpeed as u8, 0x21);
    }
}
