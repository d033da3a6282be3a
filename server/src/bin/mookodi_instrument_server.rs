// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use pico_args::Arguments;
use tracing_appender::non_blocking::NonBlockingBuilder;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mookodi_elements::config::{InstrumentConfig, LacConfig};
use mookodi_elements::mechanism_trait::{DigitalIoBackend, LacTuningRegisters, LinearActuatorBackend};
use mookodi_elements::mookodi_instrument::instrument_service_server::InstrumentServiceServer;
use mookodi_server::emulation::{EmulatedDigitalIo, EmulatedLinearActuator};
use mookodi_server::instrument_rpc::InstrumentRpc;
use mookodi_server::mechanism_io_serial::SerialDigitalIo;
use mookodi_server::mechanism_io_usb::UsbLinearActuator;
use mookodi_server::mechanism_logic::MechanismLogic;

// The PIO device never appears at a configurable baud in the original
// hardware: the board is fixed at 9600 8N1. There is no corresponding
// field in InstrumentConfig, so it is hardcoded here rather than added
// to the config schema for a value that cannot actually vary.
const PIO_BAUD_RATE: u32 = 9600;

struct AppArgs {
    simulate: bool,
    config_file: String,
    file_log_level: Option<String>,
    screen_log_level: Option<String>,
}

const HELP: &str = "\
mookodi-instrument-server

FLAGS:
  -h              Prints help information
  -s              Run against emulated mechanisms instead of real hardware

OPTIONS:
  -c <path>       mookodi_instrument.toml
  -d <level>      Log to file at this level
  -D <level>      Log to screen at this level
";

fn parse_args() -> AppArgs {
    let mut pargs = Arguments::from_env();
    if pargs.contains("-h") {
        println!("{}", HELP);
        std::process::exit(0);
    }
    let args = AppArgs {
        simulate: pargs.contains("-s"),
        config_file: pargs.value_from_str("-c")
            .unwrap_or_else(|_| "mookodi_instrument.toml".to_string()),
        file_log_level: pargs.opt_value_from_str("-d").unwrap(),
        screen_log_level: pargs.opt_value_from_str("-D").unwrap(),
    };
    let _ = pargs.finish();
    args
}

fn init_logging(args: &AppArgs) {
    let level = args.screen_log_level.clone()
        .or_else(|| args.file_log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    let env_filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    match &args.file_log_level {
        None => {
            tracing_subscriber::registry().with(env_filter).with(fmt::layer()).init();
        }
        Some(_) => {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("mookodi_instrument")
                .max_log_files(10)
                .build(".")
                .expect("setting up rolling log file");
            let (non_blocking_file, guard) = NonBlockingBuilder::default().finish(file_appender);
            std::mem::forget(guard);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking_file))
                .init();
        }
    }
}

fn tuning_registers(lac: &LacConfig) -> LacTuningRegisters {
    let t = &lac.tuning;
    LacTuningRegisters {
        speed: t.speed,
        accuracy: t.accuracy,
        retract_limit: t.retract_limit,
        extend_limit: t.extend_limit,
        movement_threshold: t.movement_threshold,
        stall_time: t.stall_time,
        pwm_threshold: t.pwm_threshold,
        derivative_threshold: t.derivative_threshold,
        derivative_maximum: t.derivative_maximum,
        derivative_minimum: t.derivative_minimum,
        pwm_maximum: t.pwm_maximum,
        pwm_minimum: t.pwm_minimum,
        proportional_gain: t.proportional_gain,
        derivative_gain: t.derivative_gain,
        average_rc: t.average_rc,
        average_adc: t.average_adc,
    }
}

fn main() {
    let args = parse_args();
    init_logging(&args);

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

    let config = match InstrumentConfig::load(std::path::Path::new(&args.config_file)) {
        Ok(c) => c,
        Err(e) => {
            error!("Could not load {}: {}", args.config_file, e.message);
            std::process::exit(1);
        }
    };

    async_main(args, config);
}

#[tokio::main]
async fn async_main(args: AppArgs, config: InstrumentConfig) {
    let filter_positions: [[i32; 5]; 2] = [
        std::array::from_fn(|i| config.lac[0].filters[i].position),
        std::array::from_fn(|i| config.lac[1].filters[i].position),
    ];
    // Both actuators share one settle tolerance; only lac[0]'s is used
    // (the config schema allows them to differ, mechanism_logic does not).
    let accuracy = config.lac[0].tuning.accuracy;

    let io: Box<dyn DigitalIoBackend> = if args.simulate {
        Box::new(EmulatedDigitalIo::default())
    } else {
        match SerialDigitalIo::open(&config.pio_device, PIO_BAUD_RATE) {
            Ok(io) => Box::new(io),
            Err(e) => {
                error!("Could not open {}: {}", config.pio_device, e.message);
                std::process::exit(1);
            }
        }
    };

    let actuators: [Box<dyn LinearActuatorBackend>; 2] = if args.simulate {
        [Box::new(EmulatedLinearActuator::default()), Box::new(EmulatedLinearActuator::default())]
    } else {
        let mut opened: Vec<Box<dyn LinearActuatorBackend>> = Vec::with_capacity(2);
        for (index, lac) in config.lac.iter().enumerate() {
            let actuator = match UsbLinearActuator::open(index) {
                Ok(a) => a,
                Err(e) => {
                    error!("Could not open LAC {}: {}", index, e.message);
                    std::process::exit(1);
                }
            };
            if let Err(e) = actuator.configure(&tuning_registers(lac)).await {
                error!("Could not configure LAC {}: {}", index, e.message);
                std::process::exit(1);
            }
            opened.push(Box::new(actuator));
        }
        opened.try_into().unwrap_or_else(|_| unreachable!("exactly two actuators, validated at config load"))
    };

    let logic = MechanismLogic::new(io, actuators, filter_positions, accuracy);
    let rpc = InstrumentRpc::new(logic);

    let addr = SocketAddr::from(([0, 0, 0, 0], 9021));
    info!("mookodi-instrument-server listening at {:?}", addr);
    tonic::transport::Server::builder()
        .add_service(InstrumentServiceServer::new(rpc))
        .serve(addr)
        .await
        .expect("gRPC server exited");
}
