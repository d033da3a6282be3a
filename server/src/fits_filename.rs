// Deterministic FITS filename/run-number generator, anchored to the
// observing night. Grounded on ccd_fits_filename.c
// (CCD_Fits_Filename_Initialise/Next_Run/Get_Filename/Lock/UnLock);
// simplified to this server's single run-number axis (the original's
// separate multrun/window counters have no spec counterpart and are
// dropped, per DESIGN.md).

use std::fs;
use std::path::{Path, PathBuf};

use mookodi_elements::error::filesystem_error;
use mookodi_elements::mjd::night_date;
use canonical_error::CanonicalError;
use std::time::SystemTime;

/// `<root>/<telescope>/<instrument>/<YYYY>/<MMDD>/<code>_<yyyymmdd>.<runNNNN>.fits`
pub struct FitsFilenameGenerator {
    root: PathBuf,
    telescope: String,
    instrument: String,
    instrument_code: char,
    current_date: u32,
    current_run_number: u32,
}

impl FitsFilenameGenerator {
    /// Scans the current night's directory (if it already exists),
    /// parses filenames matching this instrument code and night
    /// stamp, and sets the run counter to the highest observed run
    /// number; files that don't match are ignored.
    pub fn initialise(
        root: impl Into<PathBuf>, telescope: &str, instrument: &str, instrument_code: char,
        now: SystemTime,
    ) -> Result<Self, CanonicalError> {
        let mut gen = FitsFilenameGenerator {
            root: root.into(),
            telescope: telescope.to_string(),
            instrument: instrument.to_string(),
            instrument_code,
            current_date: night_date(now),
            current_run_number: 0,
        };
        gen.current_run_number = gen.scan_max_run_number(gen.current_date)?;
        Ok(gen)
    }

    fn night_dir(&self, date: u32) -> PathBuf {
        let year = date / 10_000;
        let mmdd = date % 10_000;
        self.root.join(&self.telescope).join(&self.instrument)
            .join(format!("{:04}", year))
            .join(format!("{:04}", mmdd))
    }

    fn scan_max_run_number(&self, date: u32) -> Result<u32, CanonicalError> {
        let dir = self.night_dir(date);
        let prefix = format!("{}_{}.", self.instrument_code, date);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(filesystem_error(&format!("scanning {}: {}", dir.display(), e))),
        };
        let mut max_run = 0u32;
        for entry in entries {
            let entry = entry.map_err(|e| filesystem_error(&format!("reading dir entry: {}", e)))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(run) = parse_run_number(&name, &prefix) {
                max_run = max_run.max(run);
            }
        }
        Ok(max_run)
    }

    /// Rolls the night directory if the observing date has changed
    /// since the last call, creating `<year>/<mmdd>` as needed, then
    /// increments the run number (resetting it to 0 first if this call
    /// just created a fresh night directory).
    pub fn next_run(&mut self, now: SystemTime) -> Result<u32, CanonicalError> {
        let date = night_date(now);
        let dir = self.night_dir(date);
        let rolled = date != self.current_date;
        let created = !dir.exists();
        fs::create_dir_all(&dir)
            .map_err(|e| filesystem_error(&format!("creating {}: {}", dir.display(), e)))?;
        if rolled {
            self.current_date = date;
        }
        if created || rolled {
            self.current_run_number = 0;
        }
        self.current_run_number += 1;
        Ok(self.current_run_number)
    }

    pub fn current_date(&self) -> u32 {
        self.current_date
    }

    pub fn current_run_number(&self) -> u32 {
        self.current_run_number
    }

    pub fn filename_for(&self, date: u32, run_number: u32) -> PathBuf {
        self.night_dir(date).join(
            format!("{}_{}.{:04}.fits", self.instrument_code, date, run_number))
    }

    /// Writes a sibling `.lock` file using exclusive-create semantics;
    /// fails if the lock already exists. The server never reads lock
    /// files itself — they're a protocol for an out-of-scope data mover.
    pub fn lock(&self, filename: &Path) -> Result<(), CanonicalError> {
        let lock_path = lock_path_for(filename);
        fs::OpenOptions::new().write(true).create_new(true).open(&lock_path)
            .map_err(|e| filesystem_error(&format!("locking {}: {}", lock_path.display(), e)))?;
        Ok(())
    }

    pub fn unlock(&self, filename: &Path) -> Result<(), CanonicalError> {
        let lock_path = lock_path_for(filename);
        match fs::remove_file(&lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(filesystem_error(&format!("unlocking {}: {}", lock_path.display(), e))),
        }
    }
}

fn lock_path_for(filename: &Path) -> PathBuf {
    filename.with_extension("lock")
}

fn parse_run_number(name: &str, prefix: &str) -> Option<u32> {
    let rest = name.strip_prefix(prefix)?;
    let rest = rest.strip_suffix(".fits")?;
    rest.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ut(hour: u64) -> SystemTime {
        // An arbitrary UTC instant with the given hour-of-day, chosen
        // so the night-date math is exercised the same way in every
        // test run regardless of wall-clock time.
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + hour * 3600)
    }

    #[test]
    fn initialise_with_empty_directory_starts_at_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let gen = FitsFilenameGenerator::initialise(
            tmp.path(), "lt", "mookodi", 'm', ut(14)).unwrap();
        assert_eq!(gen.current_run_number(), 0);
    }

    #[test]
    fn next_run_increments_and_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let mut gen = FitsFilenameGenerator::initialise(
            tmp.path(), "lt", "mookodi", 'm', ut(14)).unwrap();
        assert_eq!(gen.next_run(ut(14)).unwrap(), 1);
        assert_eq!(gen.next_run(ut(14)).unwrap(), 2);
        let dir = gen.night_dir(gen.current_date());
        assert!(dir.is_dir());
    }

    #[test]
    fn initialise_scans_existing_files_for_max_run() {
        let tmp = tempfile::tempdir().unwrap();
        let mut gen = FitsFilenameGenerator::initialise(
            tmp.path(), "lt", "mookodi", 'm', ut(14)).unwrap();
        let date = gen.current_date();
        let dir = gen.night_dir(date);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("m_{}.0003.fits", date)), b"").unwrap();
        fs::write(dir.join(format!("m_{}.0007.fits", date)), b"").unwrap();
        fs::write(dir.join("unrelated.fits"), b"").unwrap();

        let gen2 = FitsFilenameGenerator::initialise(
            tmp.path(), "lt", "mookodi", 'm', ut(14)).unwrap();
        assert_eq!(gen2.current_run_number(), 7);
        drop(gen.next_run(ut(14)));
    }

    #[test]
    fn night_rollover_resets_run_number() {
        let tmp = tempfile::tempdir().unwrap();
        let mut gen = FitsFilenameGenerator::initialise(
            tmp.path(), "lt", "mookodi", 'm', ut(8)).unwrap();
        gen.next_run(ut(8)).unwrap();
        gen.next_run(ut(8)).unwrap();
        // Jump 24h forward, onto a new observing night.
        let next_night = ut(8) + Duration::from_secs(24 * 3600);
        let run = gen.next_run(next_night).unwrap();
        assert_eq!(run, 1);
    }

    #[test]
    fn lock_then_unlock_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let gen = FitsFilenameGenerator::initialise(
            tmp.path(), "lt", "mookodi", 'm', ut(14)).unwrap();
        let filename = tmp.path().join("m_20240101.0001.fits");
        fs::write(&filename, b"").unwrap();
        gen.lock(&filename).unwrap();
        assert!(filename.with_extension("lock").exists());
        assert!(gen.lock(&filename).is_err());
        gen.unlock(&filename).unwrap();
        assert!(!filename.with_extension("lock").exists());
        gen.unlock(&filename).unwrap();
    }
}
