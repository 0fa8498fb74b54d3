/*! Greedy tolerance clustering of detections into slots.

Detections are consumed most intense first. Each one either joins the first open slot whose
representative mass lies in its tolerance window and whose representative time is within the
time tolerance, or founds a new slot at its own mass and time. A slot's representative mass
and time never change after it is founded, so the result depends on the input order, which is
why the input must be an [`IntensityOrdered`] sequence.
*/
use std::ops::Range;

use mzpeaks::Tolerance;
use thiserror::Error;
use tracing::{debug, trace};

use crate::peaks::{Detection, FragmentDetection, Polarity, SampleId};
use crate::tolerance::MassWindow;

/// Anything that can be placed into a [`Slot`]
pub trait Clusterable {
    /// The mass the item is clustered on
    fn cluster_mass(&self) -> f64;
    fn cluster_time(&self) -> f64;
    fn cluster_intensity(&self) -> f64;
    fn cluster_sample(&self) -> SampleId;
}

impl Clusterable for Detection {
    fn cluster_mass(&self) -> f64 {
        self.mz
    }

    fn cluster_time(&self) -> f64 {
        self.time
    }

    fn cluster_intensity(&self) -> f64 {
        self.intensity
    }

    fn cluster_sample(&self) -> SampleId {
        self.sample
    }
}

/// Fragment detections cluster on their precursor mass
impl Clusterable for FragmentDetection {
    fn cluster_mass(&self) -> f64 {
        self.precursor_mz
    }

    fn cluster_time(&self) -> f64 {
        self.time
    }

    fn cluster_intensity(&self) -> f64 {
        self.intensity
    }

    fn cluster_sample(&self) -> SampleId {
        self.sample
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ClusterError {
    #[error("Item {index} has intensity {intensity} which is greater than its predecessor's {previous}")]
    NotIntensityOrdered {
        index: usize,
        intensity: f64,
        previous: f64,
    },
}

/// A sequence of items in non-increasing intensity order, ties kept in their input order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IntensityOrdered<T> {
    items: Vec<T>,
}

impl<T: Clusterable> IntensityOrdered<T> {
    /// Sort `items` by descending intensity. The sort is stable.
    pub fn sort(mut items: Vec<T>) -> Self {
        items.sort_by(|a, b| b.cluster_intensity().total_cmp(&a.cluster_intensity()));
        Self { items }
    }

    /// Accept `items` which are already in descending intensity order, such as the
    /// result of an ordered store query, failing if they are not.
    pub fn checked(items: Vec<T>) -> Result<Self, ClusterError> {
        for (i, pair) in items.windows(2).enumerate() {
            let (previous, current) = (pair[0].cluster_intensity(), pair[1].cluster_intensity());
            if current.total_cmp(&previous).is_gt() {
                return Err(ClusterError::NotIntensityOrdered {
                    index: i + 1,
                    intensity: current,
                    previous,
                });
            }
        }
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items
    }
}

pub type SlotId = usize;

/// A cluster of items founded by its most intense member
#[derive(Debug, Clone, PartialEq)]
pub struct Slot<T> {
    pub id: SlotId,
    /// The representative mass, the founder's mass
    pub mass: f64,
    /// The representative time, the founder's time
    pub time: f64,
    pub sample: SampleId,
    pub min_intensity: f64,
    pub max_intensity: f64,
    /// The number of items assigned to this slot, including the founder
    pub size: usize,
    pub founder: T,
}

impl<T: Clusterable> Slot<T> {
    fn found(id: SlotId, founder: T) -> Self {
        let intensity = founder.cluster_intensity();
        Self {
            id,
            mass: founder.cluster_mass(),
            time: founder.cluster_time(),
            sample: founder.cluster_sample(),
            min_intensity: intensity,
            max_intensity: intensity,
            size: 1,
            founder,
        }
    }
}

impl<T> Slot<T> {
    pub fn polarity(&self) -> Polarity {
        Polarity::of_mass(self.mass)
    }

    /// Whether `max_intensity / min_intensity` exceeds `ratio`
    pub fn exceeds_range(&self, ratio: f64) -> bool {
        self.max_intensity > ratio * self.min_intensity
    }
}

/// Slots kept sorted by representative mass
#[derive(Debug, Clone, PartialEq)]
pub struct SlotCollection<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Default for SlotCollection<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> SlotCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The index range of slots whose mass lies in `window`, leftmost `>= low` through
    /// rightmost `<= high`
    pub fn candidates(&self, window: &MassWindow) -> Range<usize> {
        let lower = self.slots.partition_point(|s| s.mass < window.low);
        let upper = self.slots.partition_point(|s| s.mass <= window.high);
        lower..upper.max(lower)
    }

    /// Insert `slot` after any slots of equal mass, returning its index
    pub fn insert(&mut self, slot: Slot<T>) -> usize {
        let i = self.slots.partition_point(|s| s.mass <= slot.mass);
        self.slots.insert(i, slot);
        i
    }

    pub fn get(&self, i: usize) -> Option<&Slot<T>> {
        self.slots.get(i)
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut Slot<T>> {
        self.slots.get_mut(i)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Slot<T>> {
        self.slots.iter()
    }

    pub fn into_vec(self) -> Vec<Slot<T>> {
        self.slots
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterParams {
    pub mass_tolerance: Tolerance,
    /// Items join a slot only when their time differs from the slot's by strictly less
    /// than this
    pub time_tolerance: f64,
    /// Only lower a slot's minimum intensity with items from the founder's sample
    pub same_sample_minimum: bool,
}

impl ClusterParams {
    pub fn new(mass_tolerance: Tolerance, time_tolerance: f64) -> Self {
        Self {
            mass_tolerance,
            time_tolerance,
            same_sample_minimum: false,
        }
    }

    pub fn with_same_sample_minimum(mut self, value: bool) -> Self {
        self.same_sample_minimum = value;
        self
    }
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self::new(Tolerance::PPM(20.0), 2.0)
    }
}

/// A slot that passed the intensity range filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub slot: SlotId,
    pub mz: f64,
    pub time: f64,
    pub min_intensity: f64,
    pub max_intensity: f64,
    pub percentile: f64,
}

impl Feature {
    pub fn polarity(&self) -> Polarity {
        Polarity::of_mass(self.mz)
    }
}

/// The outcome of a clustering run
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResult<T> {
    /// Slots in representative mass order
    pub slots: Vec<Slot<T>>,
    /// The slot each input item was assigned to, in input order
    pub assignments: Vec<SlotId>,
    /// The largest time seen in the input, or zero
    pub max_time: f64,
}

impl<T> ClusterResult<T> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, id: SlotId) -> Option<&Slot<T>> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// The slots whose intensity range exceeds `min_ratio`, in mass order. The `k`th of `n`
    /// features gets percentile `(n - 1 - k) / n`.
    pub fn features(&self, min_ratio: f64) -> Vec<Feature> {
        let kept: Vec<_> = self
            .slots
            .iter()
            .filter(|s| s.exceeds_range(min_ratio))
            .collect();
        let n = kept.len() as f64;
        kept.into_iter()
            .enumerate()
            .map(|(k, s)| Feature {
                slot: s.id,
                mz: s.mass,
                time: s.time,
                min_intensity: s.min_intensity,
                max_intensity: s.max_intensity,
                percentile: (n - 1.0 - k as f64) / n,
            })
            .collect()
    }
}

/// Runs tolerance clustering. Each run starts from an empty slot collection and slot ids
/// count up from zero.
#[derive(Debug, Clone)]
pub struct ClusterEngine {
    pub params: ClusterParams,
    next_id: SlotId,
}

impl ClusterEngine {
    pub fn new(params: ClusterParams) -> Self {
        Self { params, next_id: 0 }
    }

    fn next_slot_id(&mut self) -> SlotId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn find_match<T>(&self, slots: &SlotCollection<T>, item: &impl Clusterable) -> Option<usize> {
        let window = MassWindow::around(item.cluster_mass(), self.params.mass_tolerance);
        let time = item.cluster_time();
        slots
            .candidates(&window)
            .find(|i| {
                slots
                    .get(*i)
                    .is_some_and(|s| (s.time - time).abs() < self.params.time_tolerance)
            })
    }

    pub fn cluster<T: Clusterable>(&mut self, items: IntensityOrdered<T>) -> ClusterResult<T> {
        self.next_id = 0;
        let n_items = items.len();
        let mut slots = SlotCollection::new();
        let mut assignments = Vec::with_capacity(n_items);
        let mut max_time: f64 = 0.0;

        for item in items.into_inner() {
            max_time = max_time.max(item.cluster_time());
            match self.find_match(&slots, &item) {
                Some(i) => {
                    let same_sample_minimum = self.params.same_sample_minimum;
                    if let Some(slot) = slots.get_mut(i) {
                        let intensity = item.cluster_intensity();
                        slot.max_intensity = slot.max_intensity.max(intensity);
                        if !same_sample_minimum || slot.sample == item.cluster_sample() {
                            slot.min_intensity = slot.min_intensity.min(intensity);
                        }
                        slot.size += 1;
                        assignments.push(slot.id);
                    }
                }
                None => {
                    let id = self.next_slot_id();
                    trace!(
                        "Founding slot {id} at {:.4} @ {:.3}",
                        item.cluster_mass(),
                        item.cluster_time()
                    );
                    slots.insert(Slot::found(id, item));
                    assignments.push(id);
                }
            }
        }
        debug!("Clustered {n_items} items into {} slots", slots.len());
        ClusterResult {
            slots: slots.into_vec(),
            assignments,
            max_time,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn engine(ppm: f64, time_tolerance: f64) -> ClusterEngine {
        ClusterEngine::new(ClusterParams::new(Tolerance::PPM(ppm), time_tolerance))
    }

    fn detections() -> Vec<Detection> {
        vec![
            Detection::new(100.0, 1.0, 1e6, 1),
            Detection::new(100.0005, 1.2, 5e5, 2),
            Detection::new(200.0, 1.1, 2e5, 1),
        ]
    }

    #[test]
    fn test_two_slots_from_three_masses() {
        let result = engine(20.0, 10.0).cluster(IntensityOrdered::sort(detections()));
        assert_eq!(result.len(), 2);
        assert_eq!(result.assignments, vec![0, 0, 1]);
        let first = result.slot(0).unwrap();
        assert_eq!(first.mass, 100.0);
        assert_eq!(first.size, 2);
        assert_eq!(first.min_intensity, 5e5);
        assert_eq!(first.max_intensity, 1e6);
        assert_eq!(result.max_time, 1.2);
    }

    #[test]
    fn test_time_tolerance_splits() {
        let dets = vec![
            Detection::new(100.0, 1.0, 10.0, 1),
            Detection::new(100.0, 3.0, 5.0, 1),
            Detection::new(100.0, 2.9, 4.0, 1),
        ];
        let result = engine(20.0, 2.0).cluster(IntensityOrdered::sort(dets));
        // |3.0 - 1.0| is not strictly less than the tolerance
        assert_eq!(result.assignments, vec![0, 1, 0]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_negative_masses() {
        let dets = vec![
            Detection::new(-100.0, 1.0, 10.0, 1),
            Detection::new(-100.0015, 1.0, 5.0, 1),
            Detection::new(100.0, 1.0, 4.0, 1),
        ];
        let result = engine(20.0, 1.0).cluster(IntensityOrdered::sort(dets));
        assert_eq!(result.assignments, vec![0, 0, 1]);
        assert_eq!(result.slots[0].polarity(), Polarity::Negative);
        assert_eq!(result.slots[1].mass, 100.0);
    }

    #[test]
    fn test_deterministic_and_complete() {
        let mut dets = Vec::new();
        for i in 0..200 {
            let mz = 100.0 + (i % 17) as f64 * 0.0007 + (i % 5) as f64 * 50.0;
            let time = (i % 11) as f64 * 0.4;
            dets.push(Detection::new(mz, time, ((i * 7919) % 1000) as f64, (i % 3) as i64 + 1));
        }
        let a = engine(10.0, 0.5).cluster(IntensityOrdered::sort(dets.clone()));
        let b = engine(10.0, 0.5).cluster(IntensityOrdered::sort(dets.clone()));
        assert_eq!(a, b);
        assert_eq!(a.assignments.len(), dets.len());
        assert_eq!(a.slots.iter().map(|s| s.size).sum::<usize>(), dets.len());

        let ordered = IntensityOrdered::sort(dets);
        for (det, id) in ordered.iter().zip(a.assignments.iter()) {
            let slot = a.slot(*id).unwrap();
            assert!(MassWindow::ppm(det.mz, 10.0).contains_mass(slot.mass));
            assert!((slot.time - det.time).abs() < 0.5);
        }
        for pair in a.slots.windows(2) {
            assert!(pair[0].mass <= pair[1].mass);
        }
    }

    #[test]
    fn test_same_sample_minimum() {
        let dets = vec![
            Detection::new(100.0, 1.0, 100.0, 1),
            Detection::new(100.0, 1.0, 50.0, 2),
            Detection::new(100.0, 1.0, 80.0, 1),
        ];
        let params = ClusterParams::new(Tolerance::PPM(20.0), 1.0).with_same_sample_minimum(true);
        let result = ClusterEngine::new(params).cluster(IntensityOrdered::sort(dets.clone()));
        assert_eq!(result.slots[0].min_intensity, 80.0);

        let result = engine(20.0, 1.0).cluster(IntensityOrdered::sort(dets));
        assert_eq!(result.slots[0].min_intensity, 50.0);
    }

    #[test]
    fn test_features() {
        let dets = vec![
            Detection::new(300.0, 1.0, 1000.0, 1),
            Detection::new(300.0, 1.0, 10.0, 1),
            Detection::new(200.0, 5.0, 900.0, 1),
            Detection::new(200.0, 5.0, 1.0, 2),
            Detection::new(400.0, 9.0, 800.0, 1),
        ];
        let result = engine(20.0, 1.0).cluster(IntensityOrdered::sort(dets));
        let features = result.features(10.0);
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].mz, 200.0);
        assert_eq!(features[0].percentile, 0.5);
        assert_eq!(features[1].mz, 300.0);
        assert_eq!(features[1].percentile, 0.0);
    }

    #[test]
    fn test_companion_clustering() {
        let frags = vec![
            FragmentDetection::new(250.1, 118.058, 3.0, 100.0, 1),
            FragmentDetection::new(250.1001, 118.0581, 3.1, 90.0, 2),
            FragmentDetection::new(250.1, 118.058, 9.0, 80.0, 1),
        ];
        let result = engine(20.0, 0.5).cluster(IntensityOrdered::checked(frags).unwrap());
        assert_eq!(result.len(), 2);
        assert_eq!(result.slots[0].founder.mz, 118.058);
        assert_eq!(result.max_time, 9.0);
    }

    #[test]
    fn test_ordering_precondition() {
        let dets = vec![
            Detection::new(100.0, 1.0, 5.0, 1),
            Detection::new(100.0, 1.0, 6.0, 1),
        ];
        assert!(matches!(
            IntensityOrdered::checked(dets.clone()),
            Err(ClusterError::NotIntensityOrdered { index: 1, .. })
        ));
        let sorted = IntensityOrdered::sort(dets);
        assert_eq!(sorted.iter().next().unwrap().intensity, 6.0);
        let empty: IntensityOrdered<Detection> = IntensityOrdered::sort(Vec::new());
        assert!(engine(20.0, 1.0).cluster(empty).is_empty());
    }
}
