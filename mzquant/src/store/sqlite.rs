use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, trace};

use crate::peaks::{Detection, FragmentDetection, Polarity, Sample, SampleId, ScanClass};
use crate::time_range::TimeRange;
use crate::tolerance::MassWindow;

use super::{PeakStore, ScaleFactors, StoreError};

const SAMPLES_SQL: &str = "SELECT DISTINCT ID, name FROM rawfile WHERE ID > 0 ORDER BY ID";

const SCAN_SQL: &str = "SELECT scans.rawfile, scans.rt FROM scans \
     WHERE scans.rawfile > 0 AND scans.polarity = ?1 AND scans.scan_type = ?2 \
     ORDER BY scans.rawfile, scans.rt";

const RANGE_SQL: &str = "SELECT ms1_peaks.rawfile, ms1_peaks.rt, ms1_peaks.intensity, ms1_peaks.mz \
     FROM ms1_peaks WHERE ms1_peaks.rawfile > 0 \
     AND ms1_peaks.mz >= ?1 AND ms1_peaks.mz <= ?2 \
     AND ms1_peaks.rt >= ?3 AND ms1_peaks.rt <= ?4 \
     ORDER BY ms1_peaks.rawfile, ms1_peaks.rt, ms1_peaks.intensity";

const INTENSE_SQL: &str = "SELECT ms1_peaks.intensity, ms1_peaks.mz, ms1_peaks.rt, ms1_peaks.rawfile \
     FROM ms1_peaks WHERE ms1_peaks.rawfile > 0 AND ms1_peaks.intensity > ?1 \
     ORDER BY ms1_peaks.intensity DESC";

const LOSS_SQL: &str = "SELECT ms2_peaks.precursor, ms2_peaks.mz, ms2_peaks.rt, ms2_peaks.rawfile, ms2_peaks.intensity \
     FROM ms2_peaks WHERE ms2_peaks.precursor - ms2_peaks.mz BETWEEN ?1 AND ?2 \
     ORDER BY ms2_peaks.intensity DESC";

const ABS_LOSS_SQL: &str = "SELECT ms2_peaks.precursor, ms2_peaks.mz, ms2_peaks.rt, ms2_peaks.rawfile, ms2_peaks.intensity \
     FROM ms2_peaks WHERE abs(ms2_peaks.precursor - ms2_peaks.mz) BETWEEN ?1 AND ?2 \
     ORDER BY ms2_peaks.intensity DESC";

const SCALE_SQL: &str = "SELECT value FROM sequence WHERE attribute = ?1";

/// A [`PeakStore`] backed by a study SQLite database.
///
/// The database holds `rawfile`, `scans`, `ms1_peaks`, `ms2_peaks` and `sequence` tables, with
/// masses and times stored as scaled integers. The scaling is read from the `sequence` table
/// when present.
#[derive(Debug)]
pub struct SqlitePeakStore {
    connection: Connection,
    path: PathBuf,
    factors: ScaleFactors,
}

impl SqlitePeakStore {
    /// Open the database at `path` read-only, reading its scale factors
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let connection = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let factors = Self::read_scale_factors(&connection)?;
        debug!(
            "Opened {} with mass factor {} and time factor {}",
            path.display(),
            factors.mass,
            factors.time
        );
        Ok(Self {
            connection,
            path,
            factors,
        })
    }

    /// Open the database at `path` with explicitly provided scale factors
    pub fn open_with_factors<P: AsRef<Path>>(
        path: P,
        factors: ScaleFactors,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let connection = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            connection,
            path,
            factors,
        })
    }

    /// Open a second connection to the same database, for use on another thread
    pub fn try_clone(&self) -> Result<Self, StoreError> {
        Self::open_with_factors(&self.path, self.factors)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scale_factors(&self) -> ScaleFactors {
        self.factors
    }

    fn read_scale_factor(connection: &Connection, attribute: &str) -> rusqlite::Result<f64> {
        connection.query_row(SCALE_SQL, [attribute], |row| row.get::<_, f64>(0))
    }

    /// Both factors are taken from the store or neither is.
    fn read_scale_factors(connection: &Connection) -> Result<ScaleFactors, StoreError> {
        let mass = Self::read_scale_factor(connection, "mass_translation_factor");
        let time = Self::read_scale_factor(connection, "time_translation_factor");
        match (mass, time) {
            (Ok(mass), Ok(time)) => ScaleFactors::new(mass, time),
            (mass, time) => {
                debug!(
                    "Using default scale factors, store provided mass={:?}, time={:?}",
                    mass.ok(),
                    time.ok()
                );
                Ok(ScaleFactors::default())
            }
        }
    }

    fn count(&self, sql: &str) -> Result<usize, StoreError> {
        let n: i64 = self.connection.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl PeakStore for SqlitePeakStore {
    fn samples(&self) -> Result<Vec<Sample>, StoreError> {
        let mut stmt = self.connection.prepare(SAMPLES_SQL)?;
        let samples = stmt.query_map([], |row| {
            Ok(Sample {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        samples
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn scan_times(
        &self,
        polarity: Polarity,
        scan_class: ScanClass,
    ) -> Result<Vec<(SampleId, f64)>, StoreError> {
        let mut stmt = self.connection.prepare(SCAN_SQL)?;
        let factors = self.factors;
        let pairs = stmt.query_map(
            params![polarity.as_char().to_string(), scan_class.as_str()],
            |row| {
                let sample: SampleId = row.get(0)?;
                let rt: i64 = row.get(1)?;
                Ok((sample, factors.time_from_stored(rt)))
            },
        )?;
        pairs
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn query_range(
        &self,
        window: &MassWindow,
        time_range: &TimeRange,
    ) -> Result<Vec<Detection>, StoreError> {
        let factors = self.factors;
        let bounds = (
            factors.mass_to_stored(window.low),
            factors.mass_to_stored(window.high),
            factors.time_to_stored(time_range.start),
            factors.time_to_stored(time_range.end),
        );
        trace!("Range query over {time_range} with stored bounds {bounds:?}");
        let mut stmt = self.connection.prepare_cached(RANGE_SQL)?;
        let hits = stmt.query_map(params![bounds.0, bounds.1, bounds.2, bounds.3], |row| {
            let sample: SampleId = row.get(0)?;
            let rt: i64 = row.get(1)?;
            let intensity: f64 = row.get(2)?;
            let mz: i64 = row.get(3)?;
            Ok(Detection::new(
                factors.mass_from_stored(mz),
                factors.time_from_stored(rt),
                intensity,
                sample,
            ))
        })?;
        hits.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn intense_peaks(&self, min_intensity: f64) -> Result<Vec<Detection>, StoreError> {
        let factors = self.factors;
        let mut stmt = self.connection.prepare(INTENSE_SQL)?;
        let hits = stmt.query_map([min_intensity], |row| {
            let intensity: f64 = row.get(0)?;
            let mz: i64 = row.get(1)?;
            let rt: i64 = row.get(2)?;
            let sample: SampleId = row.get(3)?;
            Ok(Detection::new(
                factors.mass_from_stored(mz),
                factors.time_from_stored(rt),
                intensity,
                sample,
            ))
        })?;
        hits.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn neutral_losses(
        &self,
        loss_window: &MassWindow,
        absolute: bool,
    ) -> Result<Vec<FragmentDetection>, StoreError> {
        let factors = self.factors;
        let sql = if absolute { ABS_LOSS_SQL } else { LOSS_SQL };
        let mut stmt = self.connection.prepare(sql)?;
        let hits = stmt.query_map(
            params![
                factors.mass_to_stored(loss_window.low),
                factors.mass_to_stored(loss_window.high)
            ],
            |row| {
                let precursor: i64 = row.get(0)?;
                let mz: i64 = row.get(1)?;
                let rt: i64 = row.get(2)?;
                let sample: SampleId = row.get(3)?;
                let intensity: f64 = row.get(4)?;
                Ok(FragmentDetection::new(
                    factors.mass_from_stored(precursor),
                    factors.mass_from_stored(mz),
                    factors.time_from_stored(rt),
                    intensity,
                    sample,
                ))
            },
        )?;
        hits.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn check_consistency(&self) -> Result<(), StoreError> {
        let expected = self.count("SELECT COUNT(DISTINCT name) FROM rawfile WHERE ID > 0")?;
        let observed = self.count("SELECT COUNT(DISTINCT rawfile) FROM scans WHERE rawfile > 0")?;
        if expected != observed {
            Err(StoreError::InconsistentSamples { expected, observed })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::ScanIndex;

    fn build_study(path: &Path, with_factors: bool) -> rusqlite::Result<()> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE rawfile (ID INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE scans (rawfile INTEGER, rt INTEGER, polarity TEXT, scan_type TEXT, scan_ID INTEGER, precursor INTEGER);
             CREATE TABLE ms1_peaks (rawfile INTEGER, rt INTEGER, intensity REAL, mz INTEGER);
             CREATE TABLE ms2_peaks (precursor INTEGER, mz INTEGER, rt INTEGER, rawfile INTEGER, intensity REAL);
             CREATE TABLE sequence (attribute TEXT, value REAL);
             INSERT INTO rawfile VALUES (0, 'blank'), (1, 'A'), (2, 'B');
             INSERT INTO scans VALUES (1, 300000, '+', 'MS1', 1, 0), (1, 306000, '+', 'MS1', 2, 0),
                                      (2, 300000, '+', 'MS1', 1, 0), (2, 312000, '-', 'MS1', 2, 0);
             INSERT INTO ms1_peaks VALUES (1, 300000, 1000000.0, 3000001), (2, 312000, 500.0, -3000001);
             INSERT INTO ms2_peaks VALUES (3000000, 1679580, 300000, 1, 2000.0),
                                          (3000000, 2000000, 300000, 1, 9000.0);",
        )?;
        if with_factors {
            conn.execute_batch(
                "INSERT INTO sequence VALUES ('mass_translation_factor', 10000), ('time_translation_factor', 1000);",
            )?;
        }
        Ok(())
    }

    #[test]
    fn test_read_study() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("study.sqlite3");
        build_study(&path, true)?;
        let store = SqlitePeakStore::open(&path)?;
        store.check_consistency()?;
        assert_eq!(store.scale_factors(), ScaleFactors::default());

        let index = ScanIndex::load(&store)?;
        assert_eq!(index.sample_names().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(index.positive.times_for(0), &[5.0, 5.1]);
        assert_eq!(index.negative.times_for(1), &[5.2]);
        assert!(index.negative.times_for(0).is_empty());

        let hits = store.query_range(&MassWindow::ppm(300.0, 20.0), &TimeRange::new(4.9, 5.1))?;
        assert_eq!(hits.len(), 1);
        assert!((hits[0].mz - 300.0001).abs() < 1e-9);
        assert_eq!(hits[0].sample, 1);

        let hits = store.query_range(&MassWindow::ppm(-300.0, 20.0), &TimeRange::default())?;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].mz < 0.0);

        let losses = store.neutral_losses(&MassWindow::ppm(132.042, 20.0), false)?;
        assert_eq!(losses.len(), 1);
        assert!((losses[0].mz - 167.958).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_default_factors_and_clone() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("study.sqlite3");
        build_study(&path, false)?;
        let store = SqlitePeakStore::open(&path)?;
        assert_eq!(store.scale_factors(), ScaleFactors::default());
        let other = store.try_clone()?;
        assert_eq!(other.intense_peaks(100.0)?.len(), 2);
        Ok(())
    }
}
