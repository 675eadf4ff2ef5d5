pub(crate) mod adapt_strategy;
pub(crate) mod kinetic;
pub(crate) mod math;
pub(crate) mod metric;
pub(crate) mod phase;
pub(crate) mod sampler_stats;
pub(crate) mod stepsize;
pub(crate) mod stepsize_init;

pub use adapt_strategy::{
    AcceptStatistic, StepInfo, TemperingTune, TuneError, TuneStats, TuneStatsBuilder, Tuner,
    TunerSettings,
};
pub use kinetic::GaussianKineticEnergy;
pub use metric::{MetricError, MetricSettings, MetricVariant, ProposalMetric};
pub use phase::{PhaseSchedule, PhaseStep, SamplingPhase, ScheduleError, ScheduleSettings};
pub use sampler_stats::StatTraceBuilder;
pub use stepsize::{DualAverage, DualAverageOptions, StepSizeSettings};
pub use stepsize_init::{find_initial_stepsize, InitialStepsizeSettings};
