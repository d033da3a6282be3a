// Typed configuration for both servers, loaded with the `config` crate
// and validated once at startup. The original instrument server read a
// flat `[section] keyword = value` INI file through plibsys
// (mkd_ini.cpp/CameraConfig.cpp); we keep the same section/keyword
// shape but let `config`+`serde` do the file-format and missing-key
// handling, and fold the validation CameraConfig.cpp deferred to each
// call site into one `validate()` pass run right after load.
//
// Per the design note resolving the "which configuration loader" open
// question: there is exactly one loader per server, used at startup
// only. Nothing re-reads the file at runtime.

use std::path::Path;

use serde::Deserialize;

use crate::error::config_error;
use canonical_error::CanonicalError;

#[derive(Debug, Clone, Deserialize)]
pub struct ReadoutSpeedPreset {
    pub hs_speed_index: i32,
    pub vs_speed_index: i32,
    pub vs_amplitude: i32,
    /// Physical horizontal shift speed this preset's index corresponds
    /// to, in MHz. spec.md's VSHIFT/HSHIFT FITS cards need this
    /// physical value, not the index used to select it.
    pub hshift_mhz: f64,
    /// Physical vertical shift speed this preset's index corresponds
    /// to, in microseconds/pixel.
    pub vshift_us_per_pixel: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadoutSpeedTable {
    #[serde(rename = "SLOW")]
    pub slow: ReadoutSpeedPreset,
    #[serde(rename = "FAST")]
    pub fast: ReadoutSpeedPreset,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlipConfig {
    pub x: bool,
    pub y: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    pub flip: FlipConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataDirConfig {
    pub root: String,
    pub telescope: String,
    pub instrument: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FitsConfig {
    pub instrument_code: String,
    pub data_dir: DataDirConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AndorConfig {
    pub config_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CcdConfig {
    pub ncols: u32,
    pub nrows: u32,
    pub image: ImageConfig,
    pub target_temperature: f64,
    pub readout_speed: ReadoutSpeedTable,
}

/// `[andor]`, `[fits]`, `[ccd]` sections of the camera server's config
/// file, matching spec.md §6's `andor.*`/`fits.*`/`ccd.*` key family.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub andor: AndorConfig,
    pub fits: FitsConfig,
    pub ccd: CcdConfig,
}

impl CameraConfig {
    pub fn load(path: &Path) -> Result<Self, CanonicalError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| config_error(&format!("reading {}: {}", path.display(), e)))?;
        let parsed: CameraConfig = settings
            .try_deserialize()
            .map_err(|e| config_error(&format!("parsing {}: {}", path.display(), e)))?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<(), CanonicalError> {
        if self.ccd.ncols == 0 || self.ccd.nrows == 0 {
            return Err(config_error("ccd.ncols and ccd.nrows must be positive"));
        }
        if !(-273.15..=100.0).contains(&self.ccd.target_temperature) {
            return Err(config_error("ccd.target_temperature out of physical range"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LacTuning {
    pub speed: i32,
    pub accuracy: i32,
    pub retract_limit: i32,
    pub extend_limit: i32,
    pub movement_threshold: i32,
    pub stall_time: i32,
    pub pwm_threshold: i32,
    pub derivative_threshold: i32,
    pub derivative_maximum: i32,
    pub derivative_minimum: i32,
    pub pwm_maximum: i32,
    pub pwm_minimum: i32,
    pub proportional_gain: i32,
    pub derivative_gain: i32,
    pub average_rc: i32,
    pub average_adc: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterPosition {
    pub position: i32,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LacConfig {
    pub tuning: LacTuning,
    /// Five slots, index 0..4, per spec.md's `LAC{n}Filter{0..4}Position/Name`.
    pub filters: Vec<FilterPosition>,
}

/// `[instrument]` section of the instrument server's config file:
/// the PIO serial device path and the two linear actuators' tuning
/// registers and filter-wheel position tables, matching spec.md §6's
/// `PIODevice`/`LAC{0,1}...` key family.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    pub pio_device: String,
    pub lac: Vec<LacConfig>,
}

impl InstrumentConfig {
    pub fn load(path: &Path) -> Result<Self, CanonicalError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| config_error(&format!("reading {}: {}", path.display(), e)))?;
        let parsed: InstrumentConfig = settings
            .try_deserialize()
            .map_err(|e| config_error(&format!("parsing {}: {}", path.display(), e)))?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<(), CanonicalError> {
        if self.lac.len() != 2 {
            return Err(config_error("exactly two linear actuators (lac[0], lac[1]) are required"));
        }
        for (i, lac) in self.lac.iter().enumerate() {
            if lac.filters.len() != 5 {
                return Err(config_error(
                    &format!("lac[{}].filters must have exactly 5 entries", i)));
            }
            for f in &lac.filters {
                if !(0..=1023).contains(&f.position) {
                    return Err(config_error(
                        &format!("lac[{}] filter position {} out of range 0..1023", i, f.position)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    const CAMERA_TOML: &str = r#"
[andor]
config_dir = "/usr/local/etc/andor"

[fits]
instrument_code = "m"
[fits.data_dir]
root = "/data"
telescope = "lt"
instrument = "mookodi"

[ccd]
ncols = 1024
nrows = 1024
target_temperature = -60.0
[ccd.image.flip]
x = false
y = true
[ccd.readout_speed.SLOW]
hs_speed_index = 0
vs_speed_index = 0
vs_amplitude = 0
hshift_mhz = 1.0
vshift_us_per_pixel = 4.33
[ccd.readout_speed.FAST]
hs_speed_index = 1
vs_speed_index = 1
vs_amplitude = 1
hshift_mhz = 5.0
vshift_us_per_pixel = 2.25
"#;

    #[test]
    fn camera_config_loads_and_validates() {
        let f = write_temp(CAMERA_TOML);
        let cfg = CameraConfig::load(f.path()).unwrap();
        assert_eq!(cfg.ccd.ncols, 1024);
        assert!(cfg.ccd.image.flip.y);
        assert_eq!(cfg.ccd.readout_speed.fast.hs_speed_index, 1);
    }

    #[test]
    fn camera_config_rejects_zero_dimensions() {
        let bad = CAMERA_TOML.replace("ncols = 1024", "ncols = 0");
        let f = write_temp(&bad);
        assert!(CameraConfig::load(f.path()).is_err());
    }

    #[test]
    fn camera_config_rejects_missing_section() {
        let f = write_temp("[andor]\nconfig_dir = \"/tmp\"\n");
        assert!(CameraConfig::load(f.path()).is_err());
    }

    const INSTRUMENT_TOML_LAC: &str = r#"
speed = 50
accuracy = 4
retract_limit = 0
extend_limit = 1023
movement_threshold = 2
stall_time = 1000
pwm_threshold = 70
derivative_threshold = 5
derivative_maximum = 10
derivative_minimum = -10
pwm_maximum = 100
pwm_minimum = -100
proportional_gain = 1
derivative_gain = 1
average_rc = 4
average_adc = 4
"#;

    fn instrument_toml() -> String {
        let filters = r#"
[[lac.filters]]
position = 0
name = "clear"
[[lac.filters]]
position = 200
name = "g"
[[lac.filters]]
position = 400
name = "r"
[[lac.filters]]
position = 600
name = "i"
[[lac.filters]]
position = 800
name = "z"
"#;
        format!(
            "pio_device = \"/dev/ttyUSB0\"\n\n[[lac]]\n[lac.tuning]\n{}\n{}\n[[lac]]\n[lac.tuning]\n{}\n{}\n",
            INSTRUMENT_TOML_LAC, filters, INSTRUMENT_TOML_LAC, filters)
    }

    #[test]
    fn instrument_config_loads_and_validates() {
        let f = write_temp(&instrument_toml());
        let cfg = InstrumentConfig::load(f.path()).unwrap();
        assert_eq!(cfg.lac.len(), 2);
        assert_eq!(cfg.lac[0].filters.len(), 5);
        assert_eq!(cfg.lac[0].filters[2].name, "r");
    }

    #[test]
    fn instrument_config_rejects_out_of_range_filter_position() {
        let bad = instrument_toml().replace("position = 800", "position = 2000");
        let f = write_temp(&bad);
        assert!(InstrumentConfig::load(f.path()).is_err());
    }
}
