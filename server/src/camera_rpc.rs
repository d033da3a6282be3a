// The Camera gRPC surface: translates wire requests into calls on
// `DetectorCache` and `ExposureWorker`, and composes `CameraState` from
// live driver status the way `cedar_server.rs`'s RPC methods compose
// their state messages from `DetectEngine`/camera state. Grounded on
// that file's handler shape: each method locks what it needs, calls
// through, and maps errors with `to_tonic_status`.

use std::sync::Arc;
use std::time::SystemTime;

use tonic::{Request, Response, Status};

use mookodi_elements::config::ReadoutSpeedTable;
use mookodi_elements::detector_trait::{AbstractDetector, ExposureStatus, TemperatureStatus};
use mookodi_elements::error::to_tonic_status;
use mookodi_elements::fits_header::{FitsHeader, FitsValue};
use mookodi_elements::mookodi_camera::camera_service_server::CameraService;
use mookodi_elements::mookodi_camera::{
    CameraState, FilenameListResponse, FilenameResponse, ImageData, SetBinningRequest,
    SetFitsHeadersRequest, SetGainRequest, SetReadoutSpeedRequest, SetWindowRequest,
    StartExposeRequest, StartMultbiasRequest, StartMultdarkRequest, StartMultrunRequest,
};
use mookodi_elements::mookodi_common::{
    Empty, ExposureKind, ExposureState as ProtoExposureState, FitsCard as ProtoFitsCard,
    FitsCardType, Gain, ReadoutSpeed, TemperatureStatus as ProtoTemperatureStatus, Window,
};
use tokio::sync::Mutex;

use crate::detector_cache::DetectorCache;
use crate::exposure_worker::{CampaignKind, ExposureWorker};
use crate::fits_filename::FitsFilenameGenerator;
use crate::frame_header::FrameAcquisitionParams;

pub struct CameraRpc<D: AbstractDetector + 'static> {
    cache: DetectorCache<D>,
    worker: Mutex<ExposureWorker<D>>,
    header_store: Mutex<FitsHeader>,
    filename_generator: Arc<Mutex<FitsFilenameGenerator>>,
    readout_presets: ReadoutSpeedTable,
    target_temperature: f64,
}

impl<D: AbstractDetector + 'static> CameraRpc<D> {
    pub fn new(
        cache: DetectorCache<D>, filename_generator: Arc<Mutex<FitsFilenameGenerator>>,
        readout_presets: ReadoutSpeedTable, target_temperature: f64,
    ) -> Self {
        let detector = cache.detector().clone();
        CameraRpc {
            cache,
            worker: Mutex::new(ExposureWorker::new(detector, filename_generator.clone())),
            header_store: Mutex::new(FitsHeader::new()),
            filename_generator,
            readout_presets,
            target_temperature,
        }
    }

    async fn start_campaign(
        &self, kind: CampaignKind, exposure_length_ms: u32, count: u32, save: bool,
    ) -> Result<(), Status> {
        let snapshot = self.cache.snapshot().await;
        let detector = self.cache.detector();
        let head_model = detector.get_camera_head_model_name().await.map_err(to_tonic_status)?;
        let serial_number = detector.get_camera_serial_number().await.map_err(to_tonic_status)?;
        let preset = match snapshot.readout_speed {
            ReadoutSpeed::Fast => &self.readout_presets.fast,
            _ => &self.readout_presets.slow,
        };
        let vshift_us_per_pixel = detector.get_vs_speed().await.map_err(to_tonic_status)?;
        let hshift_mhz = detector.get_hs_speed().await.map_err(to_tonic_status)?;

        let acquisition = FrameAcquisitionParams {
            hbin: snapshot.hbin,
            vbin: snapshot.vbin,
            rect: snapshot.active_rect(),
            flip_x: snapshot.flip_x,
            flip_y: snapshot.flip_y,
            vshift_us_per_pixel,
            vshift_index: preset.vs_speed_index,
            vs_amplitude: preset.vs_amplitude,
            hshift_mhz,
            hshift_index: preset.hs_speed_index,
            gain_factor: match snapshot.gain {
                Gain::Two => 2.0,
                Gain::Four => 4.0,
                _ => 1.0,
            },
            head_model,
            serial_number,
        };

        let base_header = self.header_store.lock().await.clone();
        let mut worker = self.worker.lock().await;
        worker.start_campaign(kind, exposure_length_ms, count, save, acquisition, base_header)
            .await
            .map_err(to_tonic_status)
    }
}

fn proto_card_to_fits(header: &mut FitsHeader, card: &ProtoFitsCard) {
    let comment = card.comment.as_deref();
    match FitsCardType::try_from(card.r#type).unwrap_or(FitsCardType::Unspecified) {
        FitsCardType::Integer => header.add_int(&card.keyword, card.int_value, comment),
        FitsCardType::Float => header.add_float(&card.keyword, card.float_value, comment),
        FitsCardType::Boolean => header.add_logical(&card.keyword, card.bool_value, comment),
        _ => header.add_string(&card.keyword, &card.string_value, comment),
    }
    if let Some(units) = &card.units {
        header.set_units(&card.keyword, units);
    }
}

fn exposure_status_to_proto(
    status: ExposureStatus, length_ms: u32, start_time: SystemTime,
) -> (ProtoExposureState, i32, i32) {
    match status {
        ExposureStatus::Idle => (ProtoExposureState::Idle, 0, 0),
        ExposureStatus::WaitingForTrigger => (ProtoExposureState::Setup, 0, 0),
        ExposureStatus::Exposing => {
            let elapsed = start_time.elapsed().unwrap_or_default().as_millis() as i32;
            let elapsed = elapsed.min(length_ms as i32).max(0);
            (ProtoExposureState::Exposing, elapsed, (length_ms as i32 - elapsed).max(0))
        }
        ExposureStatus::Reading => (ProtoExposureState::Readout, length_ms as i32, 0),
        ExposureStatus::Error => (ProtoExposureState::Unspecified, 0, 0),
    }
}

fn campaign_kind_to_proto(kind: CampaignKind) -> ExposureKind {
    match kind {
        CampaignKind::Bias => ExposureKind::Bias,
        CampaignKind::Dark => ExposureKind::Dark,
        CampaignKind::Science => ExposureKind::Science,
    }
}

fn temperature_status_to_proto(status: TemperatureStatus) -> ProtoTemperatureStatus {
    match status {
        TemperatureStatus::Off => ProtoTemperatureStatus::Off,
        TemperatureStatus::Ambient => ProtoTemperatureStatus::Ambient,
        TemperatureStatus::Ok => ProtoTemperatureStatus::Ok,
        TemperatureStatus::Ramping => ProtoTemperatureStatus::Ramping,
        TemperatureStatus::Unknown => ProtoTemperatureStatus::Unknown,
    }
}

#[tonic::async_trait]
impl<D: AbstractDetector + 'static> CameraService for CameraRpc<D> {
    async fn set_binning(&self, request: Request<SetBinningRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        self.cache.set_binning(req.hbin as u32, req.vbin as u32).await.map_err(to_tonic_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn set_window(&self, request: Request<SetWindowRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        self.cache.set_window(
            req.x_start as u32, req.y_start as u32, req.x_end as u32, req.y_end as u32)
            .await.map_err(to_tonic_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn clear_window(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.cache.clear_window().await.map_err(to_tonic_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn set_readout_speed(
        &self, request: Request<SetReadoutSpeedRequest>,
    ) -> Result<Response<Empty>, Status> {
        let speed = request.into_inner().speed();
        let preset = match speed {
            ReadoutSpeed::Fast => &self.readout_presets.fast,
            _ => &self.readout_presets.slow,
        };
        self.cache.set_readout_speed(
            speed, preset.hs_speed_index, preset.vs_speed_index, preset.vs_amplitude,
            preset.hshift_mhz, preset.vshift_us_per_pixel)
            .await.map_err(to_tonic_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn set_gain(&self, request: Request<SetGainRequest>) -> Result<Response<Empty>, Status> {
        self.cache.set_gain(request.into_inner().gain()).await.map_err(to_tonic_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn set_fits_headers(
        &self, request: Request<SetFitsHeadersRequest>,
    ) -> Result<Response<Empty>, Status> {
        let mut header = self.header_store.lock().await;
        header.clear();
        for card in &request.into_inner().cards {
            proto_card_to_fits(&mut header, card);
        }
        Ok(Response::new(Empty {}))
    }

    async fn add_fits_header(&self, request: Request<ProtoFitsCard>) -> Result<Response<Empty>, Status> {
        let mut header = self.header_store.lock().await;
        proto_card_to_fits(&mut header, &request.into_inner());
        Ok(Response::new(Empty {}))
    }

    async fn clear_fits_headers(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.header_store.lock().await.clear();
        Ok(Response::new(Empty {}))
    }

    async fn start_expose(&self, request: Request<StartExposeRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        self.start_campaign(CampaignKind::Science, req.exposure_length_ms as u32, 1, req.save).await?;
        Ok(Response::new(Empty {}))
    }

    async fn start_multbias(
        &self, request: Request<StartMultbiasRequest>,
    ) -> Result<Response<Empty>, Status> {
        let count = request.into_inner().count as u32;
        self.start_campaign(CampaignKind::Bias, 0, count, true).await?;
        Ok(Response::new(Empty {}))
    }

    async fn start_multdark(
        &self, request: Request<StartMultdarkRequest>,
    ) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        self.start_campaign(CampaignKind::Dark, req.exposure_length_ms as u32, req.count as u32, true).await?;
        Ok(Response::new(Empty {}))
    }

    async fn start_multrun(
        &self, request: Request<StartMultrunRequest>,
    ) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        self.start_campaign(CampaignKind::Science, req.exposure_length_ms as u32, req.count as u32, true).await?;
        Ok(Response::new(Empty {}))
    }

    async fn abort_exposure(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.worker.lock().await.abort().await.map_err(to_tonic_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn cool_down(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.cache.cool_down(self.target_temperature).await.map_err(to_tonic_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn warm_up(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.cache.warm_up().await.map_err(to_tonic_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn get_state(&self, _request: Request<Empty>) -> Result<Response<CameraState>, Status> {
        let snapshot = self.cache.snapshot().await;
        let detector = self.cache.detector();

        // A detector that failed its startup sequence stays reachable for
        // status reporting, but querying it further would just produce
        // more hardware errors, so report idle/unknown instead of calling
        // through.
        let (exposure_state, elapsed_ms, remaining_ms, temperature_kelvin, temperature_status) =
            if self.cache.is_online().await {
                let status = detector.exposure_status_get().await.map_err(to_tonic_status)?;
                let length_ms = detector.exposure_length_get().await.map_err(to_tonic_status)?;
                let start_time = detector.exposure_start_time_get().await.map_err(to_tonic_status)?;
                let (exposure_state, elapsed_ms, remaining_ms) =
                    exposure_status_to_proto(status, length_ms, start_time);

                let (temperature_kelvin, temperature_status) =
                    if matches!(status, ExposureStatus::Exposing | ExposureStatus::Reading) {
                        let (temp, status, _ts) = detector.get_cached_temperature_with_timestamp()
                            .await.map_err(to_tonic_status)?;
                        (temp, status)
                    } else {
                        detector.get_temperature().await.map_err(to_tonic_status)?
                    };
                (exposure_state, elapsed_ms, remaining_ms, temperature_kelvin, temperature_status)
            } else {
                (ProtoExposureState::Idle, 0, 0, 0.0, TemperatureStatus::Unknown)
            };

        let mut worker = self.worker.lock().await;
        let busy = worker.is_busy();
        let progress = worker.progress().await;

        let (xs, ys, xe, ye) = snapshot.window;
        Ok(Response::new(CameraState {
            ncols: snapshot.ncols as i32,
            nrows: snapshot.nrows as i32,
            hbin: snapshot.hbin as i32,
            vbin: snapshot.vbin as i32,
            window_enabled: snapshot.window_enabled,
            window: Some(Window {
                x_start: xs as i32, y_start: ys as i32, x_end: xe as i32, y_end: ye as i32,
            }),
            readout_speed: snapshot.readout_speed as i32,
            gain: snapshot.gain as i32,
            flip_x: snapshot.flip_x,
            flip_y: snapshot.flip_y,
            exposure_state: exposure_state as i32,
            elapsed_ms,
            remaining_ms,
            exposure_kind: campaign_kind_to_proto(progress.kind) as i32,
            exposure_index: progress.exposure_index as i32,
            exposure_count: progress.exposure_count as i32,
            temperature_kelvin: temperature_kelvin + 273.15,
            temperature_status: temperature_status_to_proto(temperature_status) as i32,
            last_filename: progress.last_filename.unwrap_or_default(),
            filename_list: progress.filename_list,
            busy,
        }))
    }

    async fn get_image_data(&self, _request: Request<Empty>) -> Result<Response<ImageData>, Status> {
        let worker = self.worker.lock().await;
        let buffer = worker.last_buffer().await;
        let snapshot = self.cache.snapshot().await;
        let (xs, ys, xe, ye) = snapshot.active_rect();
        let x_size = (xe - xs + 1) / snapshot.hbin;
        let y_size = (ye - ys + 1) / snapshot.vbin;

        let pixels = buffer.map(|b| b.pixels).unwrap_or_default();
        let mut bytes = Vec::with_capacity(pixels.len() * 2);
        for pixel in &pixels {
            bytes.extend_from_slice(&pixel.to_ne_bytes());
        }

        Ok(Response::new(ImageData { x_size: x_size as i32, y_size: y_size as i32, pixels: bytes }))
    }

    async fn get_last_image_filename(
        &self, _request: Request<Empty>,
    ) -> Result<Response<FilenameResponse>, Status> {
        let progress = self.worker.lock().await.progress().await;
        Ok(Response::new(FilenameResponse { filename: progress.last_filename.unwrap_or_default() }))
    }

    async fn get_image_filenames(
        &self, _request: Request<Empty>,
    ) -> Result<Response<FilenameListResponse>, Status> {
        let progress = self.worker.lock().await.progress().await;
        Ok(Response::new(FilenameListResponse { filenames: progress.filename_list }))
    }
}
