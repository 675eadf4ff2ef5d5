use arrow::array::{ArrayBuilder, BooleanBuilder, PrimitiveBuilder, StructArray};
use arrow::datatypes::{DataType, Field, Float64Type, UInt64Type};
use faer::Mat;
use thiserror::Error;

use crate::kinetic::GaussianKineticEnergy;
use crate::metric::{MetricError, MetricSettings, ProposalMetric};
use crate::phase::{PhaseSchedule, SamplingPhase, ScheduleError, ScheduleSettings};
use crate::sampler_stats::StatTraceBuilder;
use crate::stepsize::{DualAverage, RunningMean, StepSizeSettings};
use crate::stepsize_init::{find_initial_stepsize, InitialStepsizeSettings};

#[derive(Error, Debug)]
pub enum TuneError {
    #[error("invalid phase schedule")]
    InvalidSchedule(#[from] ScheduleError),
    #[error("mass matrix adaptation failed")]
    MetricAdaptationFailed(#[from] MetricError),
}

/// Acceptance statistic reported by the proposal kernel for one iteration.
#[derive(Debug, Clone, Copy)]
pub struct AcceptStatistic {
    /// Acceptance rate of the proposal.
    pub rate: f64,
    /// Step accepted or rejected.
    pub accepted: bool,
}

/// Pass-through handle for the temperature of the target density.
///
/// The temperature itself is owned by an external annealing schedule; the
/// tuner only freezes it once exploration starts.
#[derive(Debug, Clone, Copy)]
pub struct TemperingTune {
    temperature: f64,
    frozen: bool,
}

impl TemperingTune {
    pub fn new(temperature: f64) -> Self {
        Self {
            temperature,
            frozen: false,
        }
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        if !self.frozen {
            self.temperature = temperature;
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn freeze(&mut self) {
        self.frozen = true;
    }
}

impl Default for TemperingTune {
    fn default() -> Self {
        Self::new(1.)
    }
}

/// Settings for the full tuning aggregate.
#[derive(Debug, Clone, Copy)]
pub struct TunerSettings {
    pub schedule: ScheduleSettings,
    pub step_size: StepSizeSettings,
    pub search: InitialStepsizeSettings,
    pub metric: MetricSettings,
    /// Store generated quantities for each draw while sampling.
    pub generated: bool,
}

impl Default for TunerSettings {
    fn default() -> Self {
        Self {
            schedule: ScheduleSettings::default(),
            step_size: StepSizeSettings::default(),
            search: InitialStepsizeSettings::default(),
            metric: MetricSettings::default(),
            generated: false,
        }
    }
}

/// Step size and phase handed back to the kernel after each iteration.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo {
    pub phase: SamplingPhase,
    pub step_size: f64,
}

/// Per chain tuning state.
///
/// Owns the phase schedule, the dual averaging state, the covariance
/// estimate and the kinetic energy built from it. One instance per chain,
/// driven by the chain's sampling loop once per iteration.
pub struct Tuner {
    schedule: PhaseSchedule,
    step_size_adapt: DualAverage,
    step_size: f64,
    target_accept: f64,
    search: InitialStepsizeSettings,
    proposal: ProposalMetric,
    kinetic: GaussianKineticEnergy,
    tempering: TemperingTune,
    generated: bool,
    last_phase: SamplingPhase,
    accept_mean: RunningMean,
    divergences: u64,
    diverging: bool,
}

impl Tuner {
    /// New tuner with the identity as initial mass matrix.
    pub fn new(settings: TunerSettings, dim: usize) -> Result<Self, TuneError> {
        let schedule = PhaseSchedule::new(settings.schedule)?;
        Ok(Self::from_parts(
            settings,
            schedule,
            ProposalMetric::new(settings.metric, dim),
        ))
    }

    /// New tuner seeded with a prior covariance estimate.
    pub fn with_prior_metric(
        settings: TunerSettings,
        dim: usize,
        sigma: Mat<f64>,
    ) -> Result<Self, TuneError> {
        let schedule = PhaseSchedule::new(settings.schedule)?;
        let proposal = ProposalMetric::with_sigma(settings.metric, dim, sigma)?;
        Ok(Self::from_parts(settings, schedule, proposal))
    }

    /// New tuner with an explicit window plan instead of the default one.
    pub fn with_schedule(
        settings: TunerSettings,
        dim: usize,
        schedule: PhaseSchedule,
    ) -> Result<Self, TuneError> {
        Ok(Self::from_parts(
            settings,
            schedule,
            ProposalMetric::new(settings.metric, dim),
        ))
    }

    fn from_parts(settings: TunerSettings, schedule: PhaseSchedule, proposal: ProposalMetric) -> Self {
        let kinetic = GaussianKineticEnergy::from_metric(&proposal);
        Self {
            schedule,
            step_size_adapt: DualAverage::new(
                settings.step_size.params,
                settings.step_size.initial_step,
            ),
            step_size: settings.step_size.initial_step,
            target_accept: settings.step_size.target_accept,
            search: settings.search,
            proposal,
            kinetic,
            tempering: TemperingTune::default(),
            generated: settings.generated,
            last_phase: SamplingPhase::Warmup,
            accept_mean: RunningMean::new(),
            divergences: 0,
            diverging: false,
        }
    }

    /// Run the initial step size search and reseed the dual averager.
    ///
    /// `local_accept` probes the acceptance rate of a single trial leapfrog
    /// step at a given step size. Call once before the first iteration.
    pub fn init_step_size(&mut self, local_accept: impl FnMut(f64) -> f64) {
        let found = find_initial_stepsize(self.search, local_accept);
        self.step_size_adapt.reset(found, 10.);
        self.step_size = found;
    }

    /// Advance the tuning state by one iteration.
    ///
    /// `draw` is the parameter vector the kernel settled on, `accept` its
    /// acceptance statistic and `divergent` whether the trajectory diverged.
    /// A divergence counts as a full rejection for step size adaptation.
    pub fn step(
        &mut self,
        draw: &[f64],
        accept: AcceptStatistic,
        divergent: bool,
    ) -> Result<StepInfo, TuneError> {
        let step = self.schedule.advance();

        if step.phase != self.last_phase {
            self.enter_phase(step.phase);
            self.last_phase = step.phase;
        }

        let rate = if divergent { 0. } else { accept.rate };
        let rate = if rate.is_nan() { 0. } else { rate.clamp(0., 1.) };
        self.accept_mean.add(rate);
        self.diverging = divergent;
        if divergent {
            self.divergences += 1;
        }

        if step.update {
            self.step_size_adapt.advance(rate, self.target_accept);
            self.step_size = self.step_size_adapt.current_step_size();
            self.proposal.observe(draw);
            if step.window_boundary {
                let changed = self.proposal.adapt()?;
                if changed {
                    self.kinetic = GaussianKineticEnergy::from_metric(&self.proposal);
                }
            }
        }

        Ok(StepInfo {
            phase: step.phase,
            step_size: self.step_size,
        })
    }

    fn enter_phase(&mut self, phase: SamplingPhase) {
        match phase {
            SamplingPhase::Warmup => {}
            SamplingPhase::SlowAdaptation => {
                // Draws from the initial buffer are still biased by the
                // starting point, estimation starts fresh.
                self.proposal.clear();
            }
            SamplingPhase::FastAdaptation => {
                // The mass matrix is fixed from here on.
                self.proposal.clear();
            }
            SamplingPhase::Exploration => {
                self.step_size = self.step_size_adapt.current_step_size_adapted();
                self.tempering.freeze();
            }
        }
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn kinetic_energy(&self) -> &GaussianKineticEnergy {
        &self.kinetic
    }

    pub fn proposal_metric(&self) -> &ProposalMetric {
        &self.proposal
    }

    pub fn phase(&self) -> SamplingPhase {
        self.last_phase
    }

    pub fn generated(&self) -> bool {
        self.generated
    }

    pub fn temperature(&self) -> f64 {
        self.tempering.temperature()
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.tempering.set_temperature(temperature);
    }

    /// Read-only view of the current tuning state.
    pub fn snapshot(&self) -> TuneStats {
        let mean_accept = if self.accept_mean.count() == 0 {
            0.
        } else {
            self.accept_mean.current()
        };
        TuneStats {
            iter: self.schedule.iterations(),
            phase: self.last_phase,
            step_size: self.step_size,
            step_size_bar: self.step_size_adapt.current_step_size_adapted(),
            mean_accept,
            divergences: self.divergences,
            diverging: self.diverging,
            temperature: self.tempering.temperature(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TuneStats {
    pub iter: u64,
    pub phase: SamplingPhase,
    pub step_size: f64,
    pub step_size_bar: f64,
    pub mean_accept: f64,
    pub divergences: u64,
    pub diverging: bool,
    pub temperature: f64,
}

pub struct TuneStatsBuilder {
    iter: PrimitiveBuilder<UInt64Type>,
    phase: PrimitiveBuilder<UInt64Type>,
    step_size: PrimitiveBuilder<Float64Type>,
    step_size_bar: PrimitiveBuilder<Float64Type>,
    mean_accept: PrimitiveBuilder<Float64Type>,
    divergences: PrimitiveBuilder<UInt64Type>,
    diverging: BooleanBuilder,
    temperature: PrimitiveBuilder<Float64Type>,
}

impl TuneStatsBuilder {
    pub fn new() -> Self {
        Self {
            iter: PrimitiveBuilder::new(),
            phase: PrimitiveBuilder::new(),
            step_size: PrimitiveBuilder::new(),
            step_size_bar: PrimitiveBuilder::new(),
            mean_accept: PrimitiveBuilder::new(),
            divergences: PrimitiveBuilder::new(),
            diverging: BooleanBuilder::new(),
            temperature: PrimitiveBuilder::new(),
        }
    }

    fn fields() -> Vec<Field> {
        vec![
            Field::new("iter", DataType::UInt64, false),
            Field::new("phase", DataType::UInt64, false),
            Field::new("step_size", DataType::Float64, false),
            Field::new("step_size_bar", DataType::Float64, false),
            Field::new("mean_accept", DataType::Float64, false),
            Field::new("divergences", DataType::UInt64, false),
            Field::new("diverging", DataType::Boolean, false),
            Field::new("temperature", DataType::Float64, false),
        ]
    }
}

impl Default for TuneStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StatTraceBuilder<TuneStats> for TuneStatsBuilder {
    fn append_value(&mut self, value: &TuneStats) {
        self.iter.append_value(value.iter);
        self.phase.append_value(value.phase.index());
        self.step_size.append_value(value.step_size);
        self.step_size_bar.append_value(value.step_size_bar);
        self.mean_accept.append_value(value.mean_accept);
        self.divergences.append_value(value.divergences);
        self.diverging.append_value(value.diverging);
        self.temperature.append_value(value.temperature);
    }

    fn finalize(self) -> Option<StructArray> {
        let Self {
            mut iter,
            mut phase,
            mut step_size,
            mut step_size_bar,
            mut mean_accept,
            mut divergences,
            mut diverging,
            mut temperature,
        } = self;

        let arrays = vec![
            ArrayBuilder::finish(&mut iter),
            ArrayBuilder::finish(&mut phase),
            ArrayBuilder::finish(&mut step_size),
            ArrayBuilder::finish(&mut step_size_bar),
            ArrayBuilder::finish(&mut mean_accept),
            ArrayBuilder::finish(&mut divergences),
            ArrayBuilder::finish(&mut diverging),
            ArrayBuilder::finish(&mut temperature),
        ];

        Some(StructArray::new(Self::fields().into(), arrays, None))
    }

    fn inspect(&self) -> Option<StructArray> {
        let Self {
            iter,
            phase,
            step_size,
            step_size_bar,
            mean_accept,
            divergences,
            diverging,
            temperature,
        } = self;

        let arrays = vec![
            ArrayBuilder::finish_cloned(iter),
            ArrayBuilder::finish_cloned(phase),
            ArrayBuilder::finish_cloned(step_size),
            ArrayBuilder::finish_cloned(step_size_bar),
            ArrayBuilder::finish_cloned(mean_accept),
            ArrayBuilder::finish_cloned(divergences),
            ArrayBuilder::finish_cloned(diverging),
            ArrayBuilder::finish_cloned(temperature),
        ];

        Some(StructArray::new(Self::fields().into(), arrays, None))
    }
}
