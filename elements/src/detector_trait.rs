// The capability surface the detector cache (`detector_cache.rs`, in
// `mookodi-server`) drives. Any concrete detector — the vendor SDK, or
// the gradient-image emulator — implements this trait; the cache and
// the exposure worker are written against the trait only. Grounded on
// the teacher's capability-trait idiom (`solver_trait.rs`'s `SolveExt`,
// `imu_trait.rs`'s `ImuExt`): one async method per hardware capability,
// each fallible, no shared state in the trait itself.

use std::time::SystemTime;

use async_trait::async_trait;
use canonical_error::CanonicalError;

use crate::fits_header::FitsHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureStatus {
    Off,
    Ambient,
    Ok,
    Ramping,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureStatus {
    Idle,
    WaitingForTrigger,
    Exposing,
    Reading,
    Error,
}

/// A detector's raw, not-yet-debinned pixel readout.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    pub pixels: Vec<u16>,
}

#[async_trait]
pub trait AbstractDetector: Send + Sync {
    async fn set_config_dir(&self, path: &str) -> Result<(), CanonicalError>;
    async fn startup(&self) -> Result<(), CanonicalError>;
    async fn shutdown(&self) -> Result<(), CanonicalError>;

    async fn set_dimensions(
        &self, ncols: u32, nrows: u32, hbin: u32, vbin: u32,
        window: Option<(u32, u32, u32, u32)>,
    ) -> Result<(), CanonicalError>;
    async fn set_flip_x(&self, flip: bool) -> Result<(), CanonicalError>;
    async fn set_flip_y(&self, flip: bool) -> Result<(), CanonicalError>;

    /// `index` selects the preset; `mhz` is that preset's physical
    /// horizontal shift speed, carried alongside the index so
    /// `get_hs_speed` can read back a real physical value instead of
    /// the index itself.
    async fn set_hs_speed(&self, index: i32, mhz: f64) -> Result<(), CanonicalError>;
    /// `index` selects the preset; `us_per_pixel` is that preset's
    /// physical vertical shift speed, same reasoning as `set_hs_speed`.
    async fn set_vs_speed(&self, index: i32, us_per_pixel: f64) -> Result<(), CanonicalError>;
    async fn set_vs_amplitude(&self, amplitude: i32) -> Result<(), CanonicalError>;
    async fn set_pre_amp_gain(&self, index: i32) -> Result<(), CanonicalError>;

    /// Physical horizontal shift speed last selected by `set_hs_speed`,
    /// in MHz. Grounded on `CCD_Setup_Get_HS_Speed`'s driver readback,
    /// distinct from the index that selects it.
    async fn get_hs_speed(&self) -> Result<f64, CanonicalError>;
    /// Physical vertical shift speed last selected by `set_vs_speed`,
    /// in microseconds/pixel. Grounded on `CCD_Setup_Get_VS_Speed`.
    async fn get_vs_speed(&self) -> Result<f64, CanonicalError>;

    async fn set_temperature(&self, target_celsius: f64) -> Result<(), CanonicalError>;
    async fn cooler_on(&self) -> Result<(), CanonicalError>;
    async fn cooler_off(&self) -> Result<(), CanonicalError>;
    async fn get_temperature(&self) -> Result<(f64, TemperatureStatus), CanonicalError>;
    async fn get_cached_temperature_with_timestamp(
        &self,
    ) -> Result<(f64, TemperatureStatus, SystemTime), CanonicalError>;

    async fn exposure_length_get(&self) -> Result<u32, CanonicalError>;
    async fn exposure_start_time_get(&self) -> Result<SystemTime, CanonicalError>;
    async fn exposure_status_get(&self) -> Result<ExposureStatus, CanonicalError>;

    async fn get_camera_head_model_name(&self) -> Result<String, CanonicalError>;
    async fn get_camera_serial_number(&self) -> Result<i32, CanonicalError>;
    async fn get_buffer_length(&self) -> Result<usize, CanonicalError>;

    /// Starts an exposure; returns once the detector has latched the
    /// request, not once the exposure completes.
    async fn expose(
        &self, open_shutter: bool, start_time: SystemTime, length_ms: u32,
    ) -> Result<(), CanonicalError>;
    async fn bias(&self) -> Result<ImageBuffer, CanonicalError>;
    /// Blocks (synchronously, on the caller's dedicated worker runtime)
    /// until the exposure started by `expose` finishes reading out, or
    /// `abort` is called from another task.
    async fn read_out(&self) -> Result<ImageBuffer, CanonicalError>;
    async fn abort(&self) -> Result<(), CanonicalError>;

    async fn save(
        &self, filename: &str, buffer: &ImageBuffer, ncols: u32, nrows: u32,
        header: &FitsHeader,
    ) -> Result<(), CanonicalError>;
}
