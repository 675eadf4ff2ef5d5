use thiserror::Error;

/// Phase of a single chain's sampling run.
///
/// Warmup and SlowAdaptation adapt both the step size and the mass matrix,
/// FastAdaptation only the step size at a fixed mass matrix, Exploration
/// adapts nothing and samples with the frozen averaged step size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPhase {
    Warmup,
    SlowAdaptation,
    FastAdaptation,
    Exploration,
}

impl SamplingPhase {
    pub fn index(self) -> u64 {
        match self {
            SamplingPhase::Warmup => 0,
            SamplingPhase::SlowAdaptation => 1,
            SamplingPhase::FastAdaptation => 2,
            SamplingPhase::Exploration => 3,
        }
    }
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("warmup window lengths must all be positive")]
    EmptyWindow,
    #[error("expected at least three warmup windows, got {0}")]
    TooFewWindows(usize),
    #[error("window lengths sum to {got}, expected warmup length {expected}")]
    WindowSumMismatch { got: u64, expected: u64 },
    #[error("warmup length {0} is too short to build a schedule")]
    WarmupTooShort(u64),
}

/// Settings for the warmup phase plan.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    /// Number of warmup (tuning) iterations.
    pub num_tune: u64,
    /// Number of iterations sampled after warmup.
    pub num_draws: u64,
    /// Length of the first warmup window, before mass matrix estimation starts.
    pub init_buffer: u64,
    /// Length of the final warmup window, where only the step size is tuned.
    pub term_buffer: u64,
    /// Length of the first mass matrix window. Later windows double in length.
    pub base_window: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            num_tune: 1000,
            num_draws: 1000,
            init_buffer: 75,
            term_buffer: 50,
            base_window: 25,
        }
    }
}

/// Classification of a single iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseStep {
    pub phase: SamplingPhase,
    /// True if the tuning state should be updated this iteration.
    pub update: bool,
    /// True on the last iteration of a mass matrix window.
    pub window_boundary: bool,
}

/// Iteration plan for one chain.
///
/// The window vector spans the whole warmup: the first entry is the Warmup
/// buffer, the middle entries are the SlowAdaptation windows after which
/// the mass matrix is recomputed, and the last entry is the FastAdaptation
/// buffer. The entries sum exactly to the warmup length.
#[derive(Debug, Clone)]
pub struct PhaseSchedule {
    windows: Vec<u64>,
    num_tune: u64,
    num_draws: u64,
    iter: u64,
    window_idx: usize,
    window_end: u64,
}

impl PhaseSchedule {
    pub fn new(settings: ScheduleSettings) -> Result<Self, ScheduleError> {
        let windows = plan_windows(settings)?;
        let schedule = Self::from_windows(windows, settings.num_draws)?;
        if schedule.num_tune != settings.num_tune {
            return Err(ScheduleError::WindowSumMismatch {
                got: schedule.num_tune,
                expected: settings.num_tune,
            });
        }
        Ok(schedule)
    }

    /// Build a schedule from an explicit window plan.
    ///
    /// The warmup length is the sum of the window lengths.
    pub fn from_windows(windows: Vec<u64>, num_draws: u64) -> Result<Self, ScheduleError> {
        if windows.len() < 3 {
            return Err(ScheduleError::TooFewWindows(windows.len()));
        }
        if windows.iter().any(|&len| len == 0) {
            return Err(ScheduleError::EmptyWindow);
        }
        let num_tune = windows.iter().sum();
        let window_end = windows[0];
        Ok(Self {
            windows,
            num_tune,
            num_draws,
            iter: 0,
            window_idx: 0,
            window_end,
        })
    }

    /// Classify the next iteration and advance the internal counter.
    ///
    /// Iterations past the declared budget clamp to Exploration.
    pub fn advance(&mut self) -> PhaseStep {
        let iter = self.iter;
        self.iter = self.iter.saturating_add(1);

        if iter >= self.num_tune {
            return PhaseStep {
                phase: SamplingPhase::Exploration,
                update: false,
                window_boundary: false,
            };
        }

        while iter >= self.window_end {
            self.window_idx += 1;
            self.window_end += self.windows[self.window_idx];
        }

        let phase = if self.window_idx == 0 {
            SamplingPhase::Warmup
        } else if self.window_idx + 1 == self.windows.len() {
            SamplingPhase::FastAdaptation
        } else {
            SamplingPhase::SlowAdaptation
        };

        let window_boundary =
            phase == SamplingPhase::SlowAdaptation && iter + 1 == self.window_end;

        PhaseStep {
            phase,
            update: true,
            window_boundary,
        }
    }

    /// Iterations classified so far.
    pub fn iterations(&self) -> u64 {
        self.iter
    }

    pub fn num_tune(&self) -> u64 {
        self.num_tune
    }

    pub fn num_draws(&self) -> u64 {
        self.num_draws
    }

    pub fn windows(&self) -> &[u64] {
        &self.windows
    }

    /// Target length of each phase, in iteration counts.
    pub fn slices(&self) -> [u64; 4] {
        let slow: u64 = self.windows[1..self.windows.len() - 1].iter().sum();
        let last = self.windows.len() - 1;
        [self.windows[0], slow, self.windows[last], self.num_draws]
    }
}

fn plan_windows(settings: ScheduleSettings) -> Result<Vec<u64>, ScheduleError> {
    let num_tune = settings.num_tune;
    if num_tune < 3 {
        return Err(ScheduleError::WarmupTooShort(num_tune));
    }

    let (init, term, base) = if settings
        .init_buffer
        .saturating_add(settings.term_buffer)
        .saturating_add(settings.base_window)
        > num_tune
    {
        // Buffers do not fit the declared warmup, rescale them proportionally.
        let init = ((num_tune as f64 * 0.15) as u64).max(1);
        let term = ((num_tune as f64 * 0.10) as u64).max(1);
        let base = num_tune - init - term;
        (init, term, base)
    } else {
        (settings.init_buffer, settings.term_buffer, settings.base_window)
    };

    if settings.init_buffer == 0 || settings.term_buffer == 0 || settings.base_window == 0 {
        return Err(ScheduleError::EmptyWindow);
    }

    let slow_span = num_tune - init - term;
    let mut windows = vec![init];
    let mut width = base;
    let mut remaining = slow_span;
    while remaining > 0 {
        if remaining < width.saturating_mul(2) {
            // The next doubling would overshoot, absorb the remainder here.
            windows.push(remaining);
            remaining = 0;
        } else {
            windows.push(width);
            remaining -= width;
            width = width.saturating_mul(2);
        }
    }
    windows.push(term);
    Ok(windows)
}
