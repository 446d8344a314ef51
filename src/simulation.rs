//! Signal generators that animate variables on a fixed tick.
//!
//! Each generator is bound to one variable and computes its value from the
//! tick counter and simulated time only, never from the stored register, so
//! the output sequence is reproducible for a given configuration.

use crate::activity::WriteSource;
use crate::registry::VariableRegistry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Longest ramp accepted, in steps.
pub const MAX_RAMP_STEPS: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("generator '{0}' already exists")]
    DuplicateGenerator(String),
    #[error("unknown generator '{0}'")]
    UnknownGenerator(String),
    #[error("generator bound to unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("invalid generator parameters: {0}")]
    InvalidParameters(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratorKind {
    Sine {
        amplitude: f64,
        offset: f64,
        period_s: f64,
        #[serde(default)]
        phase: f64,
    },
    Ramp {
        min: f64,
        max: f64,
        step: f64,
    },
    RandomWalk {
        min: f64,
        max: f64,
        max_step: f64,
        seed: u64,
    },
    Square {
        high: f64,
        low: f64,
        period_s: f64,
        duty_cycle: f64,
    },
}

impl GeneratorKind {
    pub fn validate(&self) -> Result<(), SimulationError> {
        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());
        let invalid = |reason: &str| Err(SimulationError::InvalidParameters(reason.to_string()));

        match *self {
            GeneratorKind::Sine { amplitude, offset, period_s, phase } => {
                if !finite(&[amplitude, offset, period_s, phase]) {
                    return invalid("sine parameters must be finite");
                }
                if period_s <= 0.0 {
                    return invalid("sine period must be positive");
                }
            }
            GeneratorKind::Ramp { min, max, step } => {
                if !finite(&[min, max, step]) {
                    return invalid("ramp parameters must be finite");
                }
                if step <= 0.0 || max < min {
                    return invalid("ramp needs step > 0 and max >= min");
                }
                let span = (max - min) / step;
                if !span.is_finite() || span >= MAX_RAMP_STEPS as f64 {
                    return invalid("ramp range spans too many steps");
                }
            }
            GeneratorKind::RandomWalk { min, max, max_step, .. } => {
                if !finite(&[min, max, max_step]) {
                    return invalid("random walk parameters must be finite");
                }
                if max < min || max_step < 0.0 {
                    return invalid("random walk needs max >= min and max_step >= 0");
                }
            }
            GeneratorKind::Square { high, low, period_s, duty_cycle } => {
                if !finite(&[high, low, period_s, duty_cycle]) {
                    return invalid("square parameters must be finite");
                }
                if period_s <= 0.0 || !(0.0..=1.0).contains(&duty_cycle) {
                    return invalid("square needs period > 0 and duty cycle in [0, 1]");
                }
            }
        }
        Ok(())
    }
}

/// Number of distinct values a ramp emits before wrapping, `max` included.
/// The epsilon absorbs float error so ranges that are whole multiples of
/// `step` still reach `max`.
fn ramp_steps(min: f64, max: f64, step: f64) -> u64 {
    let span = ((max - min) / step + 1e-9).floor();
    if !span.is_finite() || span < 0.0 {
        return 1;
    }
    (span.min(MAX_RAMP_STEPS as f64) as u64).saturating_add(1)
}

#[derive(Debug, Clone)]
struct WalkState {
    rng: StdRng,
    value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    pub name: String,
    pub variable: String,
    pub kind: GeneratorKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(skip)]
    walk: Option<WalkState>,
}

fn default_enabled() -> bool {
    true
}

impl Generator {
    pub fn new(name: &str, variable: &str, kind: GeneratorKind) -> Self {
        Self {
            name: name.to_string(),
            variable: variable.to_string(),
            kind,
            enabled: true,
            walk: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Value for `tick` at simulated time `t` seconds.
    pub fn sample(&mut self, tick: u64, t: f64) -> f64 {
        match self.kind {
            GeneratorKind::Sine { amplitude, offset, period_s, phase } => {
                offset + amplitude * (TAU * t / period_s + phase).sin()
            }
            GeneratorKind::Ramp { min, max, step } => {
                let steps = ramp_steps(min, max, step);
                (min + (tick % steps) as f64 * step).min(max)
            }
            GeneratorKind::RandomWalk { min, max, max_step, seed } => {
                let state = self.walk.get_or_insert_with(|| WalkState {
                    rng: StdRng::seed_from_u64(seed),
                    value: (min + max) / 2.0,
                });
                let delta = if max_step > 0.0 {
                    state.rng.random_range(-max_step..=max_step)
                } else {
                    0.0
                };
                state.value = (state.value + delta).clamp(min, max);
                state.value
            }
            GeneratorKind::Square { high, low, period_s, duty_cycle } => {
                if t.rem_euclid(period_s) < duty_cycle * period_s {
                    high
                } else {
                    low
                }
            }
        }
    }

    fn reset(&mut self) {
        self.walk = None;
    }
}

// Walk state is runtime detail, two generators with the same definition are equal.
impl PartialEq for Generator {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.variable == other.variable
            && self.kind == other.kind
            && self.enabled == other.enabled
    }
}

/// Batch of generator changes applied together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPreset {
    pub name: String,
    #[serde(default)]
    pub changes: Vec<ScenarioChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioChange {
    pub generator: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub kind: Option<GeneratorKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorFailure {
    pub generator: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub time_s: f64,
    pub written: usize,
    pub failures: Vec<GeneratorFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    pub ticks: u64,
    pub writes: u64,
    pub failed_writes: u64,
    pub generators: usize,
    pub enabled_generators: usize,
}

#[derive(Debug, Default)]
struct EngineState {
    generators: Vec<Generator>,
    tick: u64,
    writes: u64,
    failed_writes: u64,
}

impl EngineState {
    fn find_mut(&mut self, name: &str) -> Result<&mut Generator, SimulationError> {
        self.generators
            .iter_mut()
            .find(|g| g.name == name)
            .ok_or_else(|| SimulationError::UnknownGenerator(name.to_string()))
    }
}

#[derive(Debug)]
pub struct SimulationEngine {
    registry: Arc<VariableRegistry>,
    tick_interval: Duration,
    state: Mutex<EngineState>,
}

impl SimulationEngine {
    pub fn new(registry: Arc<VariableRegistry>, tick_interval: Duration) -> Self {
        Self {
            registry,
            tick_interval,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_generator(&self, generator: Generator) -> Result<(), SimulationError> {
        generator.kind.validate()?;
        if !self.registry.contains(&generator.variable) {
            return Err(SimulationError::UnknownVariable(generator.variable));
        }
        let mut state = self.lock();
        if state.generators.iter().any(|g| g.name == generator.name) {
            return Err(SimulationError::DuplicateGenerator(generator.name));
        }
        debug!("Added generator {} -> {}", generator.name, generator.variable);
        state.generators.push(generator);
        Ok(())
    }

    pub fn remove_generator(&self, name: &str) -> Result<Generator, SimulationError> {
        let mut state = self.lock();
        let index = state
            .generators
            .iter()
            .position(|g| g.name == name)
            .ok_or_else(|| SimulationError::UnknownGenerator(name.to_string()))?;
        Ok(state.generators.remove(index))
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), SimulationError> {
        self.lock().find_mut(name)?.enabled = enabled;
        Ok(())
    }

    /// Swap a generator's parameters. Random walk state restarts from the midpoint.
    pub fn update_parameters(&self, name: &str, kind: GeneratorKind) -> Result<(), SimulationError> {
        kind.validate()?;
        let mut state = self.lock();
        let generator = state.find_mut(name)?;
        generator.kind = kind;
        generator.reset();
        Ok(())
    }

    pub fn list(&self) -> Vec<Generator> {
        self.lock().generators.clone()
    }

    pub fn clear(&self) {
        self.lock().generators.clear();
    }

    pub fn current_tick(&self) -> u64 {
        self.lock().tick
    }

    pub fn stats(&self) -> SimulationStats {
        let state = self.lock();
        SimulationStats {
            ticks: state.tick,
            writes: state.writes,
            failed_writes: state.failed_writes,
            generators: state.generators.len(),
            enabled_generators: state.generators.iter().filter(|g| g.enabled).count(),
        }
    }

    /// Run every enabled generator once and advance the tick counter.
    pub fn tick(&self) -> TickReport {
        let mut state = self.lock();
        let tick = state.tick;
        let t = tick as f64 * self.tick_interval.as_secs_f64();

        let mut written = 0;
        let mut failures = Vec::new();
        for generator in state.generators.iter_mut().filter(|g| g.enabled) {
            let value = generator.sample(tick, t);
            match self
                .registry
                .write_engineering(&generator.variable, value, WriteSource::Simulation)
            {
                Ok(_) => written += 1,
                Err(e) => {
                    warn!("Generator {} failed to write {}: {}", generator.name, generator.variable, e);
                    failures.push(GeneratorFailure {
                        generator: generator.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        state.tick += 1;
        state.writes += written as u64;
        state.failed_writes += failures.len() as u64;
        debug!("Tick {} (t={:.1}s): {} writes, {} failures", tick, t, written, failures.len());

        TickReport {
            tick,
            time_s: t,
            written,
            failures,
        }
    }

    /// Apply a scenario. Nothing changes unless every entry is valid.
    pub fn apply_scenario(&self, preset: &ScenarioPreset) -> Result<usize, SimulationError> {
        let mut state = self.lock();
        for change in &preset.changes {
            if !state.generators.iter().any(|g| g.name == change.generator) {
                return Err(SimulationError::UnknownGenerator(change.generator.clone()));
            }
            if let Some(kind) = &change.kind {
                kind.validate()?;
            }
        }

        for change in &preset.changes {
            let generator = state.find_mut(&change.generator)?;
            if let Some(enabled) = change.enabled {
                generator.enabled = enabled;
            }
            if let Some(kind) = &change.kind {
                generator.kind = kind.clone();
                generator.reset();
            }
        }
        info!("🎬 Applied scenario '{}' ({} changes)", preset.name, preset.changes.len());
        Ok(preset.changes.len())
    }

    /// Tick on a fixed interval until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.tick_interval);
        info!("⚙️  Simulation running every {:?}", self.tick_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick();
                    if !report.failures.is_empty() {
                        debug!("Tick {} had {} failed writes", report.tick, report.failures.len());
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Simulation stopped after {} ticks", self.current_tick());
    }
}
