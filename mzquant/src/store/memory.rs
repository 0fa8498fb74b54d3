use std::collections::HashSet;

use crate::peaks::{Detection, FragmentDetection, Polarity, Sample, SampleId, ScanClass};
use crate::time_range::TimeRange;
use crate::tolerance::MassWindow;

use super::{PeakStore, StoreError};

/// A scan header held by [`MemoryPeakStore`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanRecord {
    pub sample: SampleId,
    pub time: f64,
    pub polarity: Polarity,
    pub scan_class: ScanClass,
}

/// A [`PeakStore`] over owned, already de-scaled values
#[derive(Debug, Default, Clone)]
pub struct MemoryPeakStore {
    samples: Vec<Sample>,
    scans: Vec<ScanRecord>,
    detections: Vec<Detection>,
    fragments: Vec<FragmentDetection>,
}

impl MemoryPeakStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sample(&mut self, id: SampleId, name: impl Into<String>) -> &mut Self {
        self.samples.push(Sample::new(id, name));
        self.samples.sort_by_key(|s| s.id);
        self
    }

    pub fn add_scan(
        &mut self,
        sample: SampleId,
        time: f64,
        polarity: Polarity,
        scan_class: ScanClass,
    ) -> &mut Self {
        self.scans.push(ScanRecord {
            sample,
            time,
            polarity,
            scan_class,
        });
        self
    }

    /// Add an MS1 scan at each of `times` for `sample`
    pub fn add_ms1_scans(
        &mut self,
        sample: SampleId,
        polarity: Polarity,
        times: impl IntoIterator<Item = f64>,
    ) -> &mut Self {
        for t in times {
            self.add_scan(sample, t, polarity, ScanClass::MS1);
        }
        self
    }

    pub fn add_detection(&mut self, detection: Detection) -> &mut Self {
        self.detections.push(detection);
        self
    }

    pub fn add_fragment(&mut self, fragment: FragmentDetection) -> &mut Self {
        self.fragments.push(fragment);
        self
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }
}

impl PeakStore for MemoryPeakStore {
    fn samples(&self) -> Result<Vec<Sample>, StoreError> {
        Ok(self.samples.iter().filter(|s| s.id > 0).cloned().collect())
    }

    fn scan_times(
        &self,
        polarity: Polarity,
        scan_class: ScanClass,
    ) -> Result<Vec<(SampleId, f64)>, StoreError> {
        let mut pairs: Vec<_> = self
            .scans
            .iter()
            .filter(|s| s.sample > 0 && s.polarity == polarity && s.scan_class == scan_class)
            .map(|s| (s.sample, s.time))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        Ok(pairs)
    }

    fn query_range(
        &self,
        window: &MassWindow,
        time_range: &TimeRange,
    ) -> Result<Vec<Detection>, StoreError> {
        let mut hits: Vec<_> = self
            .detections
            .iter()
            .filter(|d| {
                d.sample > 0 && window.contains_mass(d.mz) && time_range.contains_time(d.time)
            })
            .copied()
            .collect();
        hits.sort_by(|a, b| {
            a.sample
                .cmp(&b.sample)
                .then(a.time.total_cmp(&b.time))
                .then(a.intensity.total_cmp(&b.intensity))
        });
        Ok(hits)
    }

    fn intense_peaks(&self, min_intensity: f64) -> Result<Vec<Detection>, StoreError> {
        let mut hits: Vec<_> = self
            .detections
            .iter()
            .filter(|d| d.sample > 0 && d.intensity > min_intensity)
            .copied()
            .collect();
        hits.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));
        Ok(hits)
    }

    fn neutral_losses(
        &self,
        loss_window: &MassWindow,
        absolute: bool,
    ) -> Result<Vec<FragmentDetection>, StoreError> {
        let mut hits: Vec<_> = self
            .fragments
            .iter()
            .filter(|f| {
                let loss = if absolute { f.loss().abs() } else { f.loss() };
                loss_window.contains_mass(loss)
            })
            .copied()
            .collect();
        hits.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));
        Ok(hits)
    }

    fn check_consistency(&self) -> Result<(), StoreError> {
        let expected = self
            .samples
            .iter()
            .filter(|s| s.id > 0)
            .map(|s| s.name.as_str())
            .collect::<HashSet<_>>()
            .len();
        let observed = self
            .scans
            .iter()
            .filter(|s| s.sample > 0)
            .map(|s| s.sample)
            .collect::<HashSet<_>>()
            .len();
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

    fn make_store() -> MemoryPeakStore {
        let mut store = MemoryPeakStore::new();
        store
            .add_sample(2, "B")
            .add_sample(1, "A")
            .add_ms1_scans(1, Polarity::Positive, [1.0, 2.0])
            .add_ms1_scans(2, Polarity::Positive, [1.0])
            .add_detection(Detection::new(300.0, 2.0, 10.0, 2))
            .add_detection(Detection::new(300.0, 1.0, 50.0, 1))
            .add_detection(Detection::new(300.0, 1.0, 20.0, 2))
            .add_detection(Detection::new(500.0, 1.0, 90.0, 1));
        store
    }

    #[test]
    fn test_query_order() {
        let store = make_store();
        assert_eq!(store.samples().unwrap()[0].name, "A");
        let hits = store
            .query_range(&MassWindow::ppm(300.0, 10.0), &TimeRange::default())
            .unwrap();
        let order: Vec<_> = hits.iter().map(|d| (d.sample, d.time)).collect();
        assert_eq!(order, vec![(1, 1.0), (2, 1.0), (2, 2.0)]);

        let intense = store.intense_peaks(15.0).unwrap();
        let order: Vec<_> = intense.iter().map(|d| d.intensity).collect();
        assert_eq!(order, vec![90.0, 50.0, 20.0]);
    }

    #[test]
    fn test_consistency() {
        let mut store = make_store();
        assert!(store.check_consistency().is_ok());
        store.add_sample(3, "C");
        assert!(matches!(
            store.check_consistency(),
            Err(StoreError::InconsistentSamples {
                expected: 3,
                observed: 2
            })
        ));
    }
}
