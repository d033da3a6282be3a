// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use pico_args::Arguments;
use tokio::sync::Mutex;
use tracing_appender::non_blocking::NonBlockingBuilder;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mookodi_elements::config::CameraConfig;
use mookodi_elements::mookodi_camera::camera_service_server::CameraServiceServer;
use mookodi_server::camera_rpc::CameraRpc;
use mookodi_server::detector_cache::DetectorCache;
use mookodi_server::emulation::EmulatedDetector;
use mookodi_server::fits_filename::FitsFilenameGenerator;

struct AppArgs {
    config_file: String,
    logging_config_file: Option<String>,
    emulate_camera: bool,
    port: u16,
}

const HELP: &str = "\
mookodi-camera-server

FLAGS:
  -h, --help                    Prints help information
  --emulate_camera               Use the in-process emulated detector

OPTIONS:
  --config_file <path>          mookodi_camera.toml
  --logging_config_file <path>  (unset: log to stdout only)
  --port NUMBER                 9020
";

fn parse_args() -> AppArgs {
    let mut pargs = Arguments::from_env();
    if pargs.contains(["-h", "--help"]) {
        println!("{}", HELP);
        std::process::exit(0);
    }
    let args = AppArgs {
        config_file: pargs.value_from_str("--config_file")
            .unwrap_or_else(|_| "mookodi_camera.toml".to_string()),
        logging_config_file: pargs.opt_value_from_str("--logging_config_file").unwrap(),
        emulate_camera: pargs.contains("--emulate_camera"),
        port: pargs.value_from_str("--port").unwrap_or(9020),
    };
    let _ = pargs.finish();
    args
}

fn init_logging(logging_config_file: &Option<String>) {
    let stdout_layer = fmt::layer();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match logging_config_file {
        None => {
            tracing_subscriber::registry().with(env_filter).with(stdout_layer).init();
        }
        Some(path) => {
            let log_path = PathBuf::from(path);
            let dir = log_path.parent().unwrap_or(std::path::Path::new("."));
            let prefix = log_path.file_name().map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "mookodi_camera.log".to_string());
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(prefix)
                .max_log_files(10)
                .build(dir)
                .expect("setting up rolling log file");
            let (non_blocking_file, guard) = NonBlockingBuilder::default().finish(file_appender);
            std::mem::forget(guard);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking_file))
                .init();
        }
    }
}

fn main() {
    let args = parse_args();
    init_logging(&args.logging_config_file);

    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Thread panicked: {}", panic_info);
        std::process::exit(1);
    }));

    let got_signal = Arc::new(AtomicBool::new(false));
    let got_signal2 = got_signal.clone();
    ctrlc::set_handler(move || {
        info!("Got control-c");
        got_signal2.store(true, AtomicOrdering::Relaxed);
        std::thread::sleep(Duration::from_secs(1));
        std::process::exit(0);
    }).expect("installing ctrlc handler");

    let config = match CameraConfig::load(std::path::Path::new(&args.config_file)) {
        Ok(c) => c,
        Err(e) => {
            error!("Could not load {}: {}", args.config_file, e.message);
            std::process::exit(1);
        }
    };

    if !args.emulate_camera {
        error!("No real detector driver is available in this build; \
                rerun with --emulate_camera.");
        std::process::exit(1);
    }

    async_main(args, config);
}

#[tokio::main]
async fn async_main(args: AppArgs, config: CameraConfig) {
    let detector = Arc::new(EmulatedDetector::default());
    let (cache, init_result) = DetectorCache::initialize(
        detector, &config.andor.config_dir, config.ccd.ncols, config.ccd.nrows,
        config.ccd.image.flip.x, config.ccd.image.flip.y,
    ).await;
    if let Err(e) = init_result {
        error!("Detector failed to initialize, staying up in offline mode: {}", e.message);
    }

    let filename_generator = match FitsFilenameGenerator::initialise(
        PathBuf::from(&config.fits.data_dir.root),
        &config.fits.data_dir.telescope,
        &config.fits.data_dir.instrument,
        config.fits.instrument_code.chars().next().unwrap_or('m'),
        std::time::SystemTime::now(),
    ) {
        Ok(gen) => gen,
        Err(e) => {
            error!("Could not initialize FITS filename generator: {}", e.message);
            std::process::exit(1);
        }
    };

    let rpc = CameraRpc::new(
        cache, Arc::new(Mutex::new(filename_generator)),
        config.ccd.readout_speed.clone(), config.ccd.target_temperature);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("mookodi-camera-server listening at {:?}", addr);
    tonic::transport::Server::builder()
        .add_service(CameraServiceServer::new(rpc))
        .serve(addr)
        .await
        .expect("gRPC server exited");
}
