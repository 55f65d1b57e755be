pub mod registry;

pub use registry::{
    ApplySummary, CyclePhase, CycleSuccess, MetricsRegistry, OperationalState, Series, SeriesKey,
    SeriesSummary,
};
