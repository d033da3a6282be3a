// Cached configuration/state layer sitting directly on top of
// `AbstractDetector`: every setter both updates an in-memory record and
// pushes the change down to the driver, so RPC handlers (`camera_rpc.rs`)
// can read current settings without a round trip to hardware. Grounded
// on `CameraConfig.cpp`'s equivalent cache-plus-push-down pattern, and
// on spec.md §3's whole-pixel windowing invariant.

use std::sync::Arc;

use tokio::sync::Mutex;

use mookodi_elements::detector_trait::AbstractDetector;
use mookodi_elements::error::invariant_violation;
use mookodi_elements::mookodi_common::{Gain, ReadoutSpeed};
use canonical_error::CanonicalError;

#[derive(Debug, Clone)]
pub struct CachedConfig {
    pub ncols: u32,
    pub nrows: u32,
    pub hbin: u32,
    pub vbin: u32,
    pub window_enabled: bool,
    pub window: (u32, u32, u32, u32),
    pub readout_speed: ReadoutSpeed,
    pub gain: Gain,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl CachedConfig {
    fn full_frame(ncols: u32, nrows: u32, flip_x: bool, flip_y: bool) -> Self {
        CachedConfig {
            ncols, nrows, hbin: 1, vbin: 1,
            window_enabled: false, window: (1, 1, ncols, nrows),
            readout_speed: ReadoutSpeed::Slow, gain: Gain::One,
            flip_x, flip_y,
        }
    }

    /// The rect actually read out: the active window if one is set,
    /// else the full unbinned frame.
    pub fn active_rect(&self) -> (u32, u32, u32, u32) {
        if self.window_enabled { self.window } else { (1, 1, self.ncols, self.nrows) }
    }
}

pub struct DetectorCache<D: AbstractDetector> {
    detector: Arc<D>,
    config: Mutex<CachedConfig>,
    online: Mutex<bool>,
}

impl<D: AbstractDetector> DetectorCache<D> {
    /// Pushes the detector through its startup sequence and establishes
    /// a full-frame, unbinned, un-windowed baseline configuration.
    ///
    /// Always returns a usable cache, even if the startup sequence
    /// fails: `online` is set only once every step below succeeds, so a
    /// dead driver leaves the server able to come up and report its
    /// state as idle/offline rather than exiting outright. The failure
    /// itself is returned alongside the cache, for the caller to log;
    /// nothing past this point surfaces it again.
    pub async fn initialize(
        detector: Arc<D>, config_dir: &str, ncols: u32, nrows: u32,
        flip_x: bool, flip_y: bool,
    ) -> (Self, Result<(), CanonicalError>) {
        let result = Self::startup_sequence(&detector, config_dir, ncols, nrows, flip_x, flip_y).await;
        let cache = DetectorCache {
            detector,
            config: Mutex::new(CachedConfig::full_frame(ncols, nrows, flip_x, flip_y)),
            online: Mutex::new(result.is_ok()),
        };
        (cache, result)
    }

    async fn startup_sequence(
        detector: &Arc<D>, config_dir: &str, ncols: u32, nrows: u32, flip_x: bool, flip_y: bool,
    ) -> Result<(), CanonicalError> {
        detector.set_config_dir(config_dir).await?;
        detector.startup().await?;
        detector.set_flip_x(flip_x).await?;
        detector.set_flip_y(flip_y).await?;
        detector.set_dimensions(ncols, nrows, 1, 1, None).await?;
        Ok(())
    }

    pub fn detector(&self) -> &Arc<D> {
        &self.detector
    }

    pub async fn is_online(&self) -> bool {
        *self.online.lock().await
    }

    pub async fn snapshot(&self) -> CachedConfig {
        self.config.lock().await.clone()
    }

    pub async fn set_binning(&self, hbin: u32, vbin: u32) -> Result<(), CanonicalError> {
        if hbin == 0 || vbin == 0 {
            return Err(invariant_violation("hbin and vbin must both be at least 1"));
        }
        let mut config = self.config.lock().await;
        if config.window_enabled {
            check_whole_pixel(config.window, hbin, vbin)?;
        }
        config.hbin = hbin;
        config.vbin = vbin;
        let window = if config.window_enabled { Some(config.window) } else { None };
        self.detector.set_dimensions(config.ncols, config.nrows, hbin, vbin, window).await
    }

    pub async fn set_window(
        &self, x_start: u32, y_start: u32, x_end: u32, y_end: u32,
    ) -> Result<(), CanonicalError> {
        let mut config = self.config.lock().await;
        if x_start < 1 || y_start < 1 || x_end > config.ncols || y_end > config.nrows
            || x_end < x_start || y_end < y_start
        {
            return Err(invariant_violation("window bounds out of range"));
        }
        let window = (x_start, y_start, x_end, y_end);
        check_whole_pixel(window, config.hbin, config.vbin)?;
        config.window = window;
        config.window_enabled = true;
        self.detector.set_dimensions(
            config.ncols, config.nrows, config.hbin, config.vbin, Some(window)).await
    }

    pub async fn clear_window(&self) -> Result<(), CanonicalError> {
        let mut config = self.config.lock().await;
        config.window_enabled = false;
        self.detector.set_dimensions(config.ncols, config.nrows, config.hbin, config.vbin, None).await
    }

    pub async fn set_readout_speed(
        &self, speed: ReadoutSpeed, hs_speed_index: i32, vs_speed_index: i32, vs_amplitude: i32,
        hshift_mhz: f64, vshift_us_per_pixel: f64,
    ) -> Result<(), CanonicalError> {
        self.detector.set_hs_speed(hs_speed_index, hshift_mhz).await?;
        self.detector.set_vs_speed(vs_speed_index, vshift_us_per_pixel).await?;
        self.detector.set_vs_amplitude(vs_amplitude).await?;
        self.config.lock().await.readout_speed = speed;
        Ok(())
    }

    pub async fn set_gain(&self, gain: Gain) -> Result<(), CanonicalError> {
        let pre_amp_index = match gain {
            Gain::One | Gain::Unspecified => 0,
            Gain::Two => 1,
            Gain::Four => 2,
        };
        self.detector.set_pre_amp_gain(pre_amp_index).await?;
        self.config.lock().await.gain = gain;
        Ok(())
    }

    pub async fn cool_down(&self, target_celsius: f64) -> Result<(), CanonicalError> {
        self.detector.set_temperature(target_celsius).await?;
        self.detector.cooler_on().await
    }

    pub async fn warm_up(&self) -> Result<(), CanonicalError> {
        self.detector.cooler_off().await
    }
}

fn check_whole_pixel(
    window: (u32, u32, u32, u32), hbin: u32, vbin: u32,
) -> Result<(), CanonicalError> {
    let (xs, ys, xe, ye) = window;
    if (xe - xs + 1) % hbin != 0 {
        return Err(invariant_violation(
            "window width is not a whole number of binned pixels"));
    }
    if (ye - ys + 1) % vbin != 0 {
        return Err(invariant_violation(
            "window height is not a whole number of binned pixels"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::EmulatedDetector;

    async fn cache() -> DetectorCache<EmulatedDetector> {
        let (cache, result) = DetectorCache::initialize(
            Arc::new(EmulatedDetector::default()), "/tmp", 1024, 1024, false, true).await;
        result.unwrap();
        cache
    }

    #[tokio::test]
    async fn initialize_establishes_full_frame_baseline() {
        let cache = cache().await;
        let snap = cache.snapshot().await;
        assert_eq!(snap.hbin, 1);
        assert!(!snap.window_enabled);
        assert!(snap.flip_y);
    }

    #[tokio::test]
    async fn initialize_reports_online_on_success() {
        let cache = cache().await;
        assert!(cache.is_online().await);
    }

    #[tokio::test]
    async fn set_binning_rejects_zero() {
        let cache = cache().await;
        assert!(cache.set_binning(0, 1).await.is_err());
    }

    #[tokio::test]
    async fn set_window_enforces_whole_pixel_binning() {
        let cache = cache().await;
        cache.set_binning(3, 1).await.unwrap();
        // Width 10 is not a multiple of hbin=3.
        assert!(cache.set_window(1, 1, 10, 100).await.is_err());
        // Width 9 is.
        assert!(cache.set_window(1, 1, 9, 100).await.is_ok());
    }

    #[tokio::test]
    async fn clear_window_disables_without_losing_binning() {
        let cache = cache().await;
        cache.set_window(1, 1, 100, 100).await.unwrap();
        cache.clear_window().await.unwrap();
        let snap = cache.snapshot().await;
        assert!(!snap.window_enabled);
        assert_eq!(snap.hbin, 1);
    }

    #[tokio::test]
    async fn set_gain_maps_to_pre_amp_index() {
        let cache = cache().await;
        cache.set_gain(Gain::Four).await.unwrap();
        assert_eq!(cache.snapshot().await.gain, Gain::Four);
    }
}
