// Exposure-campaign worker: runs a bias/dark/science sequence of one or
// more frames on a dedicated thread, the same detached-worker idiom
// detect_engine.rs uses for its continuous detection loop, adapted to
// a one-shot campaign that reports progress instead of a cyclic result.
// Grounded on detect_engine.rs's `DetectEngine`/`DetectState` split and
// its `get_next_result`/`worker` spawn pattern: state lives behind an
// `Arc<tokio::sync::Mutex<_>>`, a worker thread builds its own
// dedicated multi-thread runtime (the worker does blocking hardware
// waits that would stall the server's main runtime), and an
// `Arc<AtomicBool>` flag tells the caller the thread has exited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;

use mookodi_elements::detector_trait::AbstractDetector;
use mookodi_elements::error::{aborted_error_kind, busy_error, hardware_error, invariant_violation, timeout_error};
use mookodi_elements::fits_header::FitsHeader;
use canonical_error::CanonicalError;

use crate::fits_filename::FitsFilenameGenerator;
use crate::frame_header::{compose_frame_header, FrameAcquisitionParams};

/// Grace period added to the nominal exposure length before the worker
/// gives up waiting on `read_out` and reports a timeout: the detector
/// driver's own readout overhead is not bounded by the spec.
const READOUT_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignKind {
    Bias,
    Dark,
    Science,
}

struct CampaignState {
    kind: CampaignKind,
    exposure_length_ms: u32,
    exposure_count: u32,
    exposure_index: u32,
    filename_list: Vec<String>,
    last_filename: Option<String>,
    abort_requested: bool,
    last_error: Option<CanonicalError>,
    // Published as soon as a frame is acquired, before it is saved:
    // a caller reading this mid-campaign sees the previous frame, by
    // design — there is no synchronisation with the save step.
    last_buffer: Option<mookodi_elements::detector_trait::ImageBuffer>,
}

impl CampaignState {
    fn idle() -> Self {
        CampaignState {
            kind: CampaignKind::Bias,
            exposure_length_ms: 0,
            exposure_count: 0,
            exposure_index: 0,
            filename_list: Vec::new(),
            last_filename: None,
            abort_requested: false,
            last_error: None,
            last_buffer: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CampaignProgress {
    pub kind: CampaignKind,
    pub exposure_count: u32,
    pub exposure_index: u32,
    pub filename_list: Vec<String>,
    pub last_filename: Option<String>,
    pub last_error: Option<String>,
}

pub struct ExposureWorker<D: AbstractDetector + 'static> {
    detector: Arc<D>,
    filename_generator: Arc<Mutex<FitsFilenameGenerator>>,
    state: Arc<Mutex<CampaignState>>,
    worker_thread: Option<std::thread::JoinHandle<()>>,
    worker_done: Arc<AtomicBool>,
}

impl<D: AbstractDetector + 'static> ExposureWorker<D> {
    pub fn new(detector: Arc<D>, filename_generator: Arc<Mutex<FitsFilenameGenerator>>) -> Self {
        ExposureWorker {
            detector,
            filename_generator,
            state: Arc::new(Mutex::new(CampaignState::idle())),
            worker_thread: None,
            worker_done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while a campaign's worker thread is alive. A caller must
    /// wait for this to go false (or call `abort`) before starting a
    /// new campaign.
    pub fn is_busy(&mut self) -> bool {
        if self.worker_done.load(Ordering::Relaxed) {
            self.worker_done.store(false, Ordering::Relaxed);
            self.worker_thread = None;
        }
        self.worker_thread.is_some()
    }

    /// Starts a one-shot campaign of `count` frames on its own thread.
    /// `save` frames are written through `filename_generator` and the
    /// detector's `save`; unsaved frames (count-only bias/dark probes)
    /// still update `exposure_index` so progress is observable.
    pub async fn start_campaign(
        &mut self, kind: CampaignKind, exposure_length_ms: u32, count: u32, save: bool,
        acquisition: FrameAcquisitionParams, base_header: FitsHeader,
    ) -> Result<(), CanonicalError> {
        if self.is_busy() {
            return Err(busy_error("a previous exposure campaign is still running"));
        }
        if count == 0 {
            return Err(invariant_violation("exposure count must be at least 1"));
        }

        {
            let mut state = self.state.lock().await;
            state.kind = kind;
            state.exposure_length_ms = exposure_length_ms;
            state.exposure_count = count;
            state.exposure_index = 0;
            state.filename_list.clear();
            state.last_filename = None;
            state.abort_requested = false;
            state.last_error = None;
        }

        let detector = self.detector.clone();
        let filename_generator = self.filename_generator.clone();
        let state = self.state.clone();
        let worker_done = self.worker_done.clone();

        self.worker_thread = Some(std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("exposure_worker")
                .build()
                .unwrap();
            runtime.block_on(async move {
                Self::run_campaign(
                    detector, filename_generator, state.clone(),
                    kind, exposure_length_ms, count, save, acquisition, base_header).await;
                worker_done.store(true, Ordering::Relaxed);
            });
        }));
        Ok(())
    }

    /// Requests that the in-progress campaign stop after its current
    /// frame. Idempotent; a no-op if no campaign is running.
    pub async fn abort(&self) -> Result<(), CanonicalError> {
        {
            let mut state = self.state.lock().await;
            state.abort_requested = true;
        }
        self.detector.abort().await
    }

    pub async fn progress(&self) -> CampaignProgress {
        let state = self.state.lock().await;
        CampaignProgress {
            kind: state.kind,
            exposure_count: state.exposure_count,
            exposure_index: state.exposure_index,
            filename_list: state.filename_list.clone(),
            last_filename: state.last_filename.clone(),
            last_error: state.last_error.as_ref().map(|e| e.message.clone()),
        }
    }

    /// The most recently acquired frame's raw pixels, if any have been
    /// captured since server startup. Deliberately not synchronised
    /// with save progress — see `CampaignState::last_buffer`.
    pub async fn last_buffer(&self) -> Option<mookodi_elements::detector_trait::ImageBuffer> {
        self.state.lock().await.last_buffer.clone()
    }

    /// The unified campaign algorithm: query the detector's buffer
    /// length, then acquire and optionally save `count` frames in
    /// sequence, checking for an abort request before each frame and
    /// bailing out (resetting progress counters) on the first hardware
    /// failure.
    async fn run_campaign(
        detector: Arc<D>, filename_generator: Arc<Mutex<FitsFilenameGenerator>>,
        state: Arc<Mutex<CampaignState>>, kind: CampaignKind, exposure_length_ms: u32,
        count: u32, save: bool, acquisition: FrameAcquisitionParams, base_header: FitsHeader,
    ) {
        for index in 0..count {
            {
                let mut s = state.lock().await;
                if s.abort_requested {
                    s.last_error = Some(aborted_error_kind("campaign aborted before frame start"));
                    return;
                }
                s.exposure_index = index;
            }

            let start_time = SystemTime::now();
            let acquisition_result = Self::acquire_one_frame(
                &detector, kind, exposure_length_ms, start_time).await;

            let buffer = match acquisition_result {
                Ok(buffer) => buffer,
                Err(e) => {
                    let mut s = state.lock().await;
                    s.exposure_count = 0;
                    s.exposure_index = 0;
                    s.last_error = Some(e);
                    return;
                }
            };

            {
                let mut s = state.lock().await;
                s.last_buffer = Some(buffer.clone());
            }

            if !save {
                continue;
            }

            let save_result = Self::save_one_frame(
                &detector, &filename_generator, &acquisition, &base_header,
                exposure_length_ms, start_time, buffer).await;

            match save_result {
                Ok(filename) => {
                    let mut s = state.lock().await;
                    s.last_filename = Some(filename.clone());
                    s.filename_list.push(filename);
                }
                Err(e) => {
                    let mut s = state.lock().await;
                    s.exposure_count = 0;
                    s.exposure_index = 0;
                    s.last_error = Some(e);
                    return;
                }
            }
        }
    }

    async fn acquire_one_frame(
        detector: &D, kind: CampaignKind, exposure_length_ms: u32, start_time: SystemTime,
    ) -> Result<mookodi_elements::detector_trait::ImageBuffer, CanonicalError> {
        match kind {
            CampaignKind::Bias => detector.bias().await,
            CampaignKind::Dark => {
                detector.expose(false, start_time, exposure_length_ms).await?;
                Self::wait_for_readout(detector, exposure_length_ms).await
            }
            CampaignKind::Science => {
                detector.expose(true, start_time, exposure_length_ms).await?;
                Self::wait_for_readout(detector, exposure_length_ms).await
            }
        }
    }

    async fn wait_for_readout(
        detector: &D, exposure_length_ms: u32,
    ) -> Result<mookodi_elements::detector_trait::ImageBuffer, CanonicalError> {
        let deadline = Duration::from_millis(exposure_length_ms as u64) + READOUT_GRACE;
        match tokio::time::timeout(deadline, detector.read_out()).await {
            Ok(result) => result,
            Err(_) => {
                let _ = detector.abort().await;
                Err(timeout_error("exposure did not complete within its deadline"))
            }
        }
    }

    async fn save_one_frame(
        detector: &D, filename_generator: &Mutex<FitsFilenameGenerator>,
        acquisition: &FrameAcquisitionParams, base_header: &FitsHeader,
        exposure_length_ms: u32, start_time: SystemTime,
        buffer: mookodi_elements::detector_trait::ImageBuffer,
    ) -> Result<String, CanonicalError> {
        let (ncols, nrows) = {
            let (xs, ys, xe, ye) = acquisition.rect;
            ((xe - xs + 1) / acquisition.hbin, (ye - ys + 1) / acquisition.vbin)
        };
        let (ccd_temp, _status, _timestamp) =
            detector.get_cached_temperature_with_timestamp().await?;
        let header = compose_frame_header(
            base_header, acquisition, exposure_length_ms, start_time, ccd_temp);

        let path = {
            let mut gen = filename_generator.lock().await;
            let run = gen.next_run(start_time)?;
            gen.filename_for(gen.current_date(), run)
        };
        let filename = path.to_string_lossy().to_string();
        detector.save(&filename, &buffer, ncols, nrows, &header)
            .await
            .map_err(|e| hardware_error("saving exposure frame", &e.message))?;
        Ok(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::EmulatedDetector;
    use std::time::Duration as StdDuration;

    fn params() -> FrameAcquisitionParams {
        FrameAcquisitionParams {
            hbin: 1, vbin: 1, rect: (1, 1, 16, 16),
            flip_x: false, flip_y: false,
            vshift_us_per_pixel: 2.25, vshift_index: 0, vs_amplitude: 0,
            hshift_mhz: 5.0, hshift_index: 0, gain_factor: 1.0,
            head_model: "emulated".to_string(), serial_number: 0,
        }
    }

    #[tokio::test]
    async fn bias_campaign_runs_unsaved_frames_without_touching_filenames() {
        let detector = Arc::new(EmulatedDetector::default());
        let tmp = tempfile::tempdir().unwrap();
        let gen = FitsFilenameGenerator::initialise(
            tmp.path(), "lt", "mookodi", 'm', SystemTime::now()).unwrap();
        let mut worker = ExposureWorker::new(detector, Arc::new(Mutex::new(gen)));

        worker.start_campaign(
            CampaignKind::Bias, 0, 3, false, params(), FitsHeader::new()).await.unwrap();

        for _ in 0..200 {
            if !worker.is_busy() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert!(!worker.is_busy());
        let progress = worker.progress().await;
        assert!(progress.last_error.is_none());
        assert!(progress.filename_list.is_empty());
    }

    #[tokio::test]
    async fn abort_mid_campaign_stops_further_frames() {
        let detector = Arc::new(EmulatedDetector::default());
        let tmp = tempfile::tempdir().unwrap();
        let gen = FitsFilenameGenerator::initialise(
            tmp.path(), "lt", "mookodi", 'm', SystemTime::now()).unwrap();
        let mut worker = ExposureWorker::new(detector, Arc::new(Mutex::new(gen)));

        worker.start_campaign(
            CampaignKind::Science, 5000, 5, false, params(), FitsHeader::new()).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        worker.abort().await.unwrap();

        for _ in 0..1000 {
            if !worker.is_busy() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        let progress = worker.progress().await;
        assert!(progress.last_error.is_some());
    }

    #[tokio::test]
    async fn busy_worker_rejects_a_second_campaign() {
        let detector = Arc::new(EmulatedDetector::default());
        let tmp = tempfile::tempdir().unwrap();
        let gen = FitsFilenameGenerator::initialise(
            tmp.path(), "lt", "mookodi", 'm', SystemTime::now()).unwrap();
        let mut worker = ExposureWorker::new(detector, Arc::new(Mutex::new(gen)));

        worker.start_campaign(
            CampaignKind::Science, 3000, 1, false, params(), FitsHeader::new()).await.unwrap();
        let second = worker.start_campaign(
            CampaignKind::Bias, 0, 1, false, params(), FitsHeader::new()).await;
        assert!(second.is_err());
        worker.abort().await.unwrap();
    }
}
