pub mod config;
pub mod detector_trait;
pub mod error;
pub mod fits_header;
pub mod mechanism_trait;
pub mod mjd;

pub mod mookodi_common {
    // The string specified here must match the proto package name.
    tonic::include_proto!("mookodi_common");
}
pub mod mookodi_camera {
    tonic::include_proto!("mookodi_camera");
}
pub mod mookodi_instrument {
    tonic::include_proto!("mookodi_instrument");
}
