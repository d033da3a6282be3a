// In-process emulated backends, selected by a runtime flag instead of
// the real detector/USB/serial drivers. From the RPC surface they are
// indistinguishable from the real thing. Grounded on
// `EmulatedCamera.cpp`'s fixed-timing gradient-image model (readout
// modelled as a separate ~1s phase from the exposure countdown) and on
// spec.md §4.7's I/O-module emulation rule (writing an output bit
// immediately flips the corresponding input bits to their settled
// state).

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::sleep;

use mookodi_elements::detector_trait::{
    AbstractDetector, ExposureStatus, ImageBuffer, TemperatureStatus,
};
use mookodi_elements::error::{aborted_error_kind, filesystem_error};
use mookodi_elements::fits_header::FitsHeader;
use mookodi_elements::mechanism_trait::{DigitalIoBackend, LacTuningRegisters, LinearActuatorBackend};
use canonical_error::CanonicalError;

struct ExposureInProgress {
    open_shutter: bool,
    length_ms: u32,
}

struct DetectorState {
    ncols: u32,
    nrows: u32,
    hbin: u32,
    vbin: u32,
    window: Option<(u32, u32, u32, u32)>,
    target_temperature: f64,
    cooler_on: bool,
    exposure: Option<ExposureInProgress>,
    exposure_start_time: SystemTime,
    hs_speed_mhz: f64,
    vs_speed_us_per_pixel: f64,
}

impl Default for DetectorState {
    fn default() -> Self {
        DetectorState {
            ncols: 1024,
            nrows: 1024,
            hbin: 1,
            vbin: 1,
            window: None,
            target_temperature: -60.0,
            cooler_on: false,
            exposure: None,
            exposure_start_time: SystemTime::UNIX_EPOCH,
            hs_speed_mhz: 0.0,
            vs_speed_us_per_pixel: 0.0,
        }
    }
}

/// Synthesises a deterministic gradient image instead of driving real
/// detector hardware.
pub struct EmulatedDetector {
    state: Mutex<DetectorState>,
    abort: AtomicBool,
}

impl Default for EmulatedDetector {
    fn default() -> Self {
        EmulatedDetector { state: Mutex::new(DetectorState::default()), abort: AtomicBool::new(false) }
    }
}

impl EmulatedDetector {
    fn binned_dims(state: &DetectorState) -> (u32, u32) {
        let (w, h) = match state.window {
            Some((xs, ys, xe, ye)) => (xe - xs + 1, ye - ys + 1),
            None => (state.ncols, state.nrows),
        };
        ((w / state.hbin).max(1), (h / state.vbin).max(1))
    }

    fn gradient_image(width: u32, height: u32) -> ImageBuffer {
        let total = (width as u64) * (height as u64);
        let mut pixels = Vec::with_capacity(total as usize);
        for j in 0..height {
            for i in 0..width {
                let value = ((i as u64) * (j as u64) * 16384) / total.max(1);
                pixels.push(value.min(u16::MAX as u64) as u16);
            }
        }
        ImageBuffer { pixels }
    }
}

#[async_trait]
impl AbstractDetector for EmulatedDetector {
    async fn set_config_dir(&self, _path: &str) -> Result<(), CanonicalError> { Ok(()) }
    async fn startup(&self) -> Result<(), CanonicalError> { Ok(()) }
    async fn shutdown(&self) -> Result<(), CanonicalError> { Ok(()) }

    async fn set_dimensions(
        &self, ncols: u32, nrows: u32, hbin: u32, vbin: u32,
        window: Option<(u32, u32, u32, u32)>,
    ) -> Result<(), CanonicalError> {
        let mut state = self.state.lock().await;
        state.ncols = ncols;
        state.nrows = nrows;
        state.hbin = hbin;
        state.vbin = vbin;
        state.window = window;
        Ok(())
    }
    async fn set_flip_x(&self, _flip: bool) -> Result<(), CanonicalError> { Ok(()) }
    async fn set_flip_y(&self, _flip: bool) -> Result<(), CanonicalError> { Ok(()) }

    async fn set_hs_speed(&self, _index: i32, mhz: f64) -> Result<(), CanonicalError> {
        self.state.lock().await.hs_speed_mhz = mhz;
        Ok(())
    }
    async fn set_vs_speed(&self, _index: i32, us_per_pixel: f64) -> Result<(), CanonicalError> {
        self.state.lock().await.vs_speed_us_per_pixel = us_per_pixel;
        Ok(())
    }
    async fn set_vs_amplitude(&self, _amplitude: i32) -> Result<(), CanonicalError> { Ok(()) }
    async fn set_pre_amp_gain(&self, _index: i32) -> Result<(), CanonicalError> { Ok(()) }

    async fn get_hs_speed(&self) -> Result<f64, CanonicalError> {
        Ok(self.state.lock().await.hs_speed_mhz)
    }
    async fn get_vs_speed(&self) -> Result<f64, CanonicalError> {
        Ok(self.state.lock().await.vs_speed_us_per_pixel)
    }

    async fn set_temperature(&self, target_celsius: f64) -> Result<(), CanonicalError> {
        self.state.lock().await.target_temperature = target_celsius;
        Ok(())
    }
    async fn cooler_on(&self) -> Result<(), CanonicalError> {
        self.state.lock().await.cooler_on = true;
        Ok(())
    }
    async fn cooler_off(&self) -> Result<(), CanonicalError> {
        self.state.lock().await.cooler_on = false;
        Ok(())
    }
    async fn get_temperature(&self) -> Result<(f64, TemperatureStatus), CanonicalError> {
        let state = self.state.lock().await;
        let status = if !state.cooler_on {
            TemperatureStatus::Off
        } else {
            TemperatureStatus::Ok
        };
        Ok((state.target_temperature, status))
    }
    async fn get_cached_temperature_with_timestamp(
        &self,
    ) -> Result<(f64, TemperatureStatus, SystemTime), CanonicalError> {
        let (temp, status) = self.get_temperature().await?;
        Ok((temp, status, SystemTime::now()))
    }

    async fn exposure_length_get(&self) -> Result<u32, CanonicalError> {
        Ok(self.state.lock().await.exposure.as_ref().map(|e| e.length_ms).unwrap_or(0))
    }
    async fn exposure_start_time_get(&self) -> Result<SystemTime, CanonicalError> {
        Ok(self.state.lock().await.exposure_start_time)
    }
    async fn exposure_status_get(&self) -> Result<ExposureStatus, CanonicalError> {
        Ok(if self.state.lock().await.exposure.is_some() {
            ExposureStatus::Exposing
        } else {
            ExposureStatus::Idle
        })
    }

    async fn get_camera_head_model_name(&self) -> Result<String, CanonicalError> {
        Ok("Emulated-iKon".to_string())
    }
    async fn get_camera_serial_number(&self) -> Result<i32, CanonicalError> {
        Ok(0)
    }
    async fn get_buffer_length(&self) -> Result<usize, CanonicalError> {
        let state = self.state.lock().await;
        let (w, h) = Self::binned_dims(&state);
        Ok((w as usize) * (h as usize))
    }

    async fn expose(
        &self, open_shutter: bool, start_time: SystemTime, length_ms: u32,
    ) -> Result<(), CanonicalError> {
        let mut state = self.state.lock().await;
        state.exposure = Some(ExposureInProgress { open_shutter, length_ms });
        state.exposure_start_time = start_time;
        self.abort.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn bias(&self) -> Result<ImageBuffer, CanonicalError> {
        let state = self.state.lock().await;
        let (w, h) = Self::binned_dims(&state);
        Ok(Self::gradient_image(w, h))
    }

    async fn read_out(&self) -> Result<ImageBuffer, CanonicalError> {
        let length_ms = {
            let state = self.state.lock().await;
            state.exposure.as_ref().map(|e| e.length_ms).unwrap_or(0)
        };

        let mut remaining = length_ms.saturating_sub(1000);
        while remaining > 0 {
            if self.abort.load(Ordering::Relaxed) {
                self.state.lock().await.exposure = None;
                return Err(aborted_error_kind("exposure aborted during countdown"));
            }
            let tick = remaining.min(1000);
            sleep(Duration::from_millis(tick as u64)).await;
            remaining -= tick;
        }
        if self.abort.load(Ordering::Relaxed) {
            self.state.lock().await.exposure = None;
            return Err(aborted_error_kind("exposure aborted during countdown"));
        }

        sleep(Duration::from_millis(1000)).await;
        if self.abort.load(Ordering::Relaxed) {
            self.state.lock().await.exposure = None;
            return Err(aborted_error_kind("exposure aborted during readout"));
        }

        let mut state = self.state.lock().await;
        state.exposure = None;
        let (w, h) = Self::binned_dims(&state);
        Ok(Self::gradient_image(w, h))
    }

    async fn abort(&self) -> Result<(), CanonicalError> {
        self.abort.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn save(
        &self, filename: &str, buffer: &ImageBuffer, ncols: u32, nrows: u32, header: &FitsHeader,
    ) -> Result<(), CanonicalError> {
        crate::fits_writer::write_image(
            std::path::Path::new(filename), header, ncols, nrows, &buffer.pixels)
            .map_err(|e| filesystem_error(&format!("emulated save of {}: {}", filename, e)))
    }
}

use crate::mechanism_logic::{
    INP_GRISM_DEPLOY, INP_GRISM_STOW, INP_MIRROR_DEPLOY, INP_MIRROR_STOW,
    INP_SLIT_DEPLOY, INP_SLIT_STOW, OUT_GRISM_DEPLOY, OUT_MIRROR_DEPLOY, OUT_SLIT_DEPLOY,
};

/// Writing an output bit immediately flips the corresponding pair of
/// input bits to their post-move state, with no simulated transit time.
pub struct EmulatedDigitalIo {
    output_mask: AtomicU8,
    input_mask: AtomicU8,
}

impl Default for EmulatedDigitalIo {
    fn default() -> Self {
        // Start fully stowed: every *_stow limit bit set.
        let stowed = INP_GRISM_STOW | INP_SLIT_STOW | INP_MIRROR_STOW;
        EmulatedDigitalIo { output_mask: AtomicU8::new(0), input_mask: AtomicU8::new(stowed) }
    }
}

#[async_trait]
impl DigitalIoBackend for EmulatedDigitalIo {
    async fn set_output_mask(&self, mask: u8) -> Result<(), CanonicalError> {
        self.output_mask.store(mask, Ordering::Relaxed);
        let mut input = self.input_mask.load(Ordering::Relaxed);
        for (output_bit, deploy_bit, stow_bit) in [
            (OUT_GRISM_DEPLOY, INP_GRISM_DEPLOY, INP_GRISM_STOW),
            (OUT_SLIT_DEPLOY, INP_SLIT_DEPLOY, INP_SLIT_STOW),
            (OUT_MIRROR_DEPLOY, INP_MIRROR_DEPLOY, INP_MIRROR_STOW),
        ] {
            if mask & output_bit != 0 {
                input = (input & !stow_bit) | deploy_bit;
            } else {
                input = (input & !deploy_bit) | stow_bit;
            }
        }
        self.input_mask.store(input, Ordering::Relaxed);
        Ok(())
    }

    async fn get_output_mask(&self) -> Result<u8, CanonicalError> {
        Ok(self.output_mask.load(Ordering::Relaxed))
    }

    async fn get_input_mask(&self) -> Result<u8, CanonicalError> {
        Ok(self.input_mask.load(Ordering::Relaxed))
    }
}

/// Position setpoints are stored verbatim and echoed back as current
/// position; `configure` always succeeds.
#[derive(Default)]
pub struct EmulatedLinearActuator {
    position: AtomicI32,
}

#[async_trait]
impl LinearActuatorBackend for EmulatedLinearActuator {
    async fn set_position(&self, target: i32) -> Result<(), CanonicalError> {
        self.position.store(target, Ordering::Relaxed);
        Ok(())
    }
    async fn get_position(&self) -> Result<i32, CanonicalError> {
        Ok(self.position.load(Ordering::Relaxed))
    }
    async fn configure(&self, _registers: &LacTuningRegisters) -> Result<(), CanonicalError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deploying_grism_sets_deployed_bit_and_clears_stowed() {
        let io = EmulatedDigitalIo::default();
        assert_eq!(io.get_input_mask().await.unwrap() & INP_GRISM_STOW, INP_GRISM_STOW);
        io.set_output_mask(OUT_GRISM_DEPLOY).await.unwrap();
        let input = io.get_input_mask().await.unwrap();
        assert_eq!(input & INP_GRISM_DEPLOY, INP_GRISM_DEPLOY);
        assert_eq!(input & INP_GRISM_STOW, 0);
    }

    #[tokio::test]
    async fn actuator_echoes_commanded_position() {
        let lac = EmulatedLinearActuator::default();
        lac.set_position(512).await.unwrap();
        assert_eq!(lac.get_position().await.unwrap(), 512);
    }

    #[tokio::test]
    async fn gradient_image_has_expected_corner_values() {
        let img = EmulatedDetector::gradient_image(4, 4);
        assert_eq!(img.pixels[0], 0);
        assert_eq!(img.pixels.len(), 16);
    }

    #[tokio::test]
    async fn abort_during_countdown_yields_aborted_error() {
        let detector = EmulatedDetector::default();
        detector.set_dimensions(4, 4, 1, 1, None).await.unwrap();
        detector.expose(true, SystemTime::now(), 5000).await.unwrap();
        detector.abort().await.unwrap();
        let result = detector.read_out().await;
        assert!(result.is_err());
    }
}
