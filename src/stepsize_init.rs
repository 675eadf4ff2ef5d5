/// Settings for the initial step size search.
#[derive(Debug, Clone, Copy)]
pub struct InitialStepsizeSettings {
    /// Lowest acceptable local acceptance rate.
    pub accept_lower: f64,
    /// Highest acceptable local acceptance rate.
    pub accept_upper: f64,
    /// Step size the bracketing starts from.
    pub initial_step: f64,
    /// Multiplicative factor for bracketing, greater than one.
    pub factor: f64,
    /// Maximum number of probe evaluations while bracketing.
    pub max_crossing_iters: u64,
    /// Maximum number of probe evaluations while bisecting.
    pub max_bisect_iters: u64,
}

impl Default for InitialStepsizeSettings {
    fn default() -> Self {
        Self {
            accept_lower: 0.25,
            accept_upper: 0.75,
            initial_step: 1.,
            factor: 2.,
            max_crossing_iters: 400,
            max_bisect_iters: 400,
        }
    }
}

/// Best candidate seen so far, by distance to the center of the band.
struct BestCandidate {
    step: f64,
    distance: f64,
    center: f64,
}

impl BestCandidate {
    fn new(settings: &InitialStepsizeSettings) -> Self {
        Self {
            step: settings.initial_step,
            distance: f64::INFINITY,
            center: 0.5 * (settings.accept_lower + settings.accept_upper),
        }
    }

    fn observe(&mut self, step: f64, accept: f64) {
        let distance = (accept - self.center).abs();
        if distance < self.distance {
            self.distance = distance;
            self.step = step;
        }
    }
}

/// Find a step size whose local acceptance rate lies inside the configured
/// band.
///
/// `local_accept` is a caller supplied probe, typically one trial leapfrog
/// step from the current position. The search brackets the band first by
/// walking the step size geometrically, then narrows the bracket by
/// bisection in log space. If either stage runs out of its budget the best
/// candidate seen so far is returned; a rough seed is harmless because dual
/// averaging corrects it within a few iterations.
pub fn find_initial_stepsize(
    settings: InitialStepsizeSettings,
    mut local_accept: impl FnMut(f64) -> f64,
) -> f64 {
    assert!(settings.factor > 1.);
    assert!(settings.accept_lower < settings.accept_upper);

    let mut best = BestCandidate::new(&settings);
    let mut probe = |step: f64, best: &mut BestCandidate| {
        let accept = local_accept(step);
        let accept = if accept.is_nan() { 0. } else { accept };
        best.observe(step, accept);
        accept
    };

    let start = settings.initial_step;
    let accept_start = probe(start, &mut best);
    if inside_band(&settings, accept_start) {
        return start;
    }

    match find_crossing_stepsize(&settings, &mut probe, &mut best, start, accept_start) {
        Crossing::Inside(step) => step,
        Crossing::Bracket { small, large } => {
            match bisect_stepsize(&settings, &mut probe, &mut best, small, large) {
                Some(step) => step,
                None => {
                    log::warn!(
                        "step size bisection did not settle inside the acceptance band, \
                         continuing with {:e}",
                        best.step
                    );
                    best.step
                }
            }
        }
        Crossing::Exhausted => {
            log::warn!(
                "step size bracketing did not cross the acceptance band, \
                 continuing with {:e}",
                best.step
            );
            best.step
        }
    }
}

enum Crossing {
    /// A probe landed inside the band while bracketing.
    Inside(f64),
    /// Step sizes straddling the band, `small` accepts above it, `large`
    /// below it.
    Bracket { small: f64, large: f64 },
    Exhausted,
}

fn find_crossing_stepsize(
    settings: &InitialStepsizeSettings,
    probe: &mut impl FnMut(f64, &mut BestCandidate) -> f64,
    best: &mut BestCandidate,
    start: f64,
    accept_start: f64,
) -> Crossing {
    // Acceptance falls as the step size grows, so a rate above the band
    // means the step is too small.
    let grow = accept_start > settings.accept_upper;
    let mut step = start;

    for _ in 0..settings.max_crossing_iters {
        let next = if grow {
            step * settings.factor
        } else {
            step / settings.factor
        };
        if !next.is_finite() || next <= 0. {
            break;
        }
        let accept = probe(next, best);
        if inside_band(settings, accept) {
            return Crossing::Inside(next);
        }
        if grow && accept < settings.accept_lower {
            return Crossing::Bracket {
                small: step,
                large: next,
            };
        }
        if !grow && accept > settings.accept_upper {
            return Crossing::Bracket {
                small: next,
                large: step,
            };
        }
        step = next;
    }
    Crossing::Exhausted
}

fn bisect_stepsize(
    settings: &InitialStepsizeSettings,
    probe: &mut impl FnMut(f64, &mut BestCandidate) -> f64,
    best: &mut BestCandidate,
    mut small: f64,
    mut large: f64,
) -> Option<f64> {
    for _ in 0..settings.max_bisect_iters {
        // Geometric midpoint, the bracket lives on a log scale.
        let mid = (small * large).sqrt();
        let accept = probe(mid, best);
        if inside_band(settings, accept) {
            return Some(mid);
        }
        if accept > settings.accept_upper {
            small = mid;
        } else {
            large = mid;
        }
    }
    None
}

fn inside_band(settings: &InitialStepsizeSettings, accept: f64) -> bool {
    accept >= settings.accept_lower && accept <= settings.accept_upper
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settles_inside_band() {
        let settings = InitialStepsizeSettings {
            accept_lower: 0.4,
            accept_upper: 0.6,
            ..InitialStepsizeSettings::default()
        };
        let mut calls = 0u64;
        let step = find_initial_stepsize(settings, |step| {
            calls += 1;
            1. / (1. + step)
        });
        let accept = 1. / (1. + step);
        assert!(accept >= 0.4 && accept <= 0.6, "accept {}", accept);
        assert!(calls <= settings.max_crossing_iters + settings.max_bisect_iters + 1);
    }

    #[test]
    fn grows_small_steps() {
        let settings = InitialStepsizeSettings {
            accept_lower: 0.4,
            accept_upper: 0.6,
            initial_step: 1e-3,
            ..InitialStepsizeSettings::default()
        };
        let step = find_initial_stepsize(settings, |step| 1. / (1. + step));
        assert!(step > 1e-3);
        let accept = 1. / (1. + step);
        assert!(accept >= 0.4 && accept <= 0.6);
    }

    #[test]
    fn exhaustion_returns_best_candidate() {
        let settings = InitialStepsizeSettings {
            max_crossing_iters: 8,
            max_bisect_iters: 8,
            ..InitialStepsizeSettings::default()
        };
        // A probe that never leaves the upper side of the band.
        let step = find_initial_stepsize(settings, |_| 0.99);
        assert!(step.is_finite());
        assert!(step > 0.);
    }

    #[test]
    fn nan_probe_counts_as_rejection() {
        let settings = InitialStepsizeSettings {
            max_crossing_iters: 8,
            max_bisect_iters: 8,
            ..InitialStepsizeSettings::default()
        };
        let step = find_initial_stepsize(settings, |_| f64::NAN);
        assert!(step.is_finite());
        assert!(step > 0.);
    }
}
