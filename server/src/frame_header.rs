// FITS-header aggregation: for each saved frame, compose the internal
// header cards spec.md §4.3 lists on top of whatever cards the client
// has already pushed via set_fits_headers/add_fits_header. Grounded on
// ccd_fits_header.c's card-by-card composition pattern (one function
// call per keyword) and on the table in spec.md §4.3.
//
// REDESIGN: VBIN is sourced from the vertical binning factor (vbin),
// not the horizontal one — the original computes it from Bin_X in one
// code path, which is almost certainly a bug.

use std::time::SystemTime;

use mookodi_elements::fits_header::FitsHeader;
use mookodi_elements::mjd::{format_date_obs, format_utstart};

#[derive(Debug, Clone)]
pub struct FrameAcquisitionParams {
    pub hbin: u32,
    pub vbin: u32,
    /// Unbinned inclusive pixel bounds actually read out: the active
    /// window if one is set, else the full frame.
    pub rect: (u32, u32, u32, u32),
    pub flip_x: bool,
    pub flip_y: bool,
    pub vshift_us_per_pixel: f64,
    pub vshift_index: i32,
    pub vs_amplitude: i32,
    pub hshift_mhz: f64,
    pub hshift_index: i32,
    pub gain_factor: f64,
    pub head_model: String,
    pub serial_number: i32,
}

pub fn compose_frame_header(
    base: &FitsHeader, params: &FrameAcquisitionParams, exposure_length_ms: u32,
    start_time: SystemTime, ccd_temp_celsius: f64,
) -> FitsHeader {
    let mut header = base.clone();

    let exptime_s = (exposure_length_ms as f64) / 1000.0;
    header.add_float("EXPTIME", exptime_s, Some("s"));
    header.add_float("EXPOSURE", exptime_s, Some("s"));

    header.add_string("UTSTART", &format_utstart(start_time), None);
    header.add_string("DATE-OBS", &format_date_obs(start_time), None);

    header.add_int("HBIN", params.hbin as i64, None);
    header.add_int("VBIN", params.vbin as i64, None);

    header.add_float("CCDTEMP", ccd_temp_celsius + 273.15, Some("K"));

    header.add_string("HEAD", &params.head_model, None);
    header.add_int("SERNO", params.serial_number as i64, None);

    header.add_logical("FLIPX", params.flip_x, None);
    header.add_logical("FLIPY", params.flip_y, None);

    let (xs, ys, xe, ye) = params.rect;
    let rect_string = format!("{}, {}, {}, {}", xs, ys, xe, ye);
    header.add_string("IMGRECT", &rect_string, None);
    header.add_string("SUBRECT", &rect_string, None);

    header.add_float("VSHIFT", params.vshift_us_per_pixel, Some("us/pixel"));
    header.add_int("VSHIFTI", params.vshift_index as i64, None);
    header.add_int("VSAMP", params.vs_amplitude as i64, None);

    header.add_float("HSHIFT", params.hshift_mhz, Some("MHz"));
    header.add_int("HSHIFTI", params.hshift_index as i64, None);

    header.add_float("GAIN", params.gain_factor, None);

    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_params() -> FrameAcquisitionParams {
        FrameAcquisitionParams {
            hbin: 2, vbin: 4, rect: (1, 1, 512, 512),
            flip_x: false, flip_y: true,
            vshift_us_per_pixel: 2.25, vshift_index: 1, vs_amplitude: 0,
            hshift_mhz: 5.0, hshift_index: 0, gain_factor: 1.0,
            head_model: "iKon-L".to_string(), serial_number: 4242,
        }
    }

    #[test]
    fn vbin_comes_from_vbin_not_hbin() {
        let header = compose_frame_header(
            &FitsHeader::new(), &sample_params(), 5000, SystemTime::UNIX_EPOCH, -60.0);
        assert_eq!(header.get("VBIN").unwrap().value, mookodi_elements::fits_header::FitsValue::Int(4));
        assert_eq!(header.get("HBIN").unwrap().value, mookodi_elements::fits_header::FitsValue::Int(2));
    }

    #[test]
    fn client_supplied_cards_survive_and_can_be_overwritten() {
        let mut base = FitsHeader::new();
        base.add_string("OBJECT", "NGC 1234", None);
        base.add_int("EXPTIME", 999, None);
        let header = compose_frame_header(
            &base, &sample_params(), 5000, SystemTime::UNIX_EPOCH, -60.0);
        assert_eq!(header.get("OBJECT").unwrap().value,
                   mookodi_elements::fits_header::FitsValue::String("NGC 1234".to_string()));
        assert_eq!(header.get("EXPTIME").unwrap().value,
                   mookodi_elements::fits_header::FitsValue::Float(5.0));
    }

    #[test]
    fn ccd_temp_is_reported_in_kelvin() {
        let header = compose_frame_header(
            &FitsHeader::new(), &sample_params(), 1000, SystemTime::UNIX_EPOCH, -60.0);
        assert_eq!(header.get("CCDTEMP").unwrap().value,
                   mookodi_elements::fits_header::FitsValue::Float(213.15));
    }

    #[test]
    fn timestamps_advance_with_start_time() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let header = compose_frame_header(&FitsHeader::new(), &sample_params(), 1000, t0, -60.0);
        assert!(header.get("UTSTART").unwrap().value
            == mookodi_elements::fits_header::FitsValue::String("00:00:10.000".to_string()));
    }
}
