
pub mod peaks;
pub mod tolerance;
pub mod time_range;
pub mod store;
pub mod formula;
pub mod labeling;

pub mod cluster;
pub mod xic;
pub mod quant;
pub mod refine;

pub use cluster::{ClusterEngine, ClusterParams, ClusterResult, IntensityOrdered, Slot};
pub use peaks::{Detection, FragmentDetection, Polarity, Sample};
pub use quant::{AnalyteQuantification, AnalyteRequest, QuantError, QuantParams, Quantifier};
pub use store::{MemoryPeakStore, PeakStore, ScanIndex, SqlitePeakStore, StoreError};
pub use time_range::TimeRange;
pub use tolerance::MassWindow;
