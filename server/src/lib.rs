pub mod camera_rpc;
pub mod detector_adapter;
pub mod detector_cache;
pub mod emulation;
pub mod exposure_worker;
pub mod fits_filename;
pub mod fits_writer;
pub mod frame_header;
pub mod instrument_rpc;
pub mod mechanism_io_serial;
pub mod mechanism_io_usb;
pub mod mechanism_logic;
