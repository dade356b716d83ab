//! Stage schedules and load profiles
//!
//! A schedule is a finite ordered sequence of stages, each holding a target
//! concurrency for its duration. Concurrency moves linearly from the previous
//! stage's target to the current one over the stage duration. Multiple
//! schedules run concurrently with independent start offsets, which lets a
//! spike overlap a sustained-load schedule.

use std::time::Duration;

use crate::error::{MailstormError, Result};

/// A time-bounded concurrency target within a schedule
#[derive(Debug, Clone)]
pub struct ScenarioStage {
    pub name: &'static str,
    pub duration: Duration,
    pub target_concurrency: usize,
}

impl ScenarioStage {
    pub fn new(name: &'static str, duration: Duration, target_concurrency: usize) -> Self {
        Self {
            name,
            duration,
            target_concurrency,
        }
    }
}

/// An ordered stage sequence with a start offset relative to run start
#[derive(Debug, Clone)]
pub struct ScenarioSchedule {
    pub name: String,
    pub start_offset: Duration,
    pub stages: Vec<ScenarioStage>,
}

impl ScenarioSchedule {
    pub fn new(name: impl Into<String>, start_offset: Duration, stages: Vec<ScenarioStage>) -> Self {
        Self {
            name: name.into(),
            start_offset,
            stages,
        }
    }

    /// Every schedule must ramp back to zero so the run has a terminal state
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(MailstormError::ConfigError {
                message: format!("schedule {} has no stages", self.name),
                config_key: None,
            });
        }
        let last = self.stages.last().unwrap();
        if last.target_concurrency != 0 {
            return Err(MailstormError::ConfigError {
                message: format!(
                    "schedule {} must end at zero concurrency, final stage {} targets {}",
                    self.name, last.name, last.target_concurrency
                ),
                config_key: None,
            });
        }
        Ok(())
    }

    /// Offset plus the sum of stage durations
    pub fn total_duration(&self) -> Duration {
        self.start_offset + self.stages.iter().map(|s| s.duration).sum::<Duration>()
    }

    /// Desired concurrency at `elapsed` since run start: zero before the
    /// offset and after the final stage, linear interpolation inside stages.
    pub fn concurrency_at(&self, elapsed: Duration) -> usize {
        if elapsed < self.start_offset {
            return 0;
        }
        let mut remaining = elapsed - self.start_offset;
        let mut previous = 0usize;
        for stage in &self.stages {
            if remaining < stage.duration {
                let fraction = remaining.as_secs_f64() / stage.duration.as_secs_f64();
                let value = previous as f64
                    + (stage.target_concurrency as f64 - previous as f64) * fraction;
                return value.round() as usize;
            }
            remaining -= stage.duration;
            previous = stage.target_concurrency;
        }
        0
    }
}

/// Concurrency and duration presets selectable from the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Profile {
    Smoke,
    Standard,
    Stress,
    Soak,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Smoke => "smoke",
            Profile::Standard => "standard",
            Profile::Stress => "stress",
            Profile::Soak => "soak",
        }
    }

    /// The stage schedules this profile runs
    pub fn schedules(&self) -> Vec<ScenarioSchedule> {
        let secs = Duration::from_secs;
        match self {
            Profile::Smoke => vec![ScenarioSchedule::new(
                "primary",
                Duration::ZERO,
                vec![
                    ScenarioStage::new("warm-up", secs(5), 2),
                    ScenarioStage::new("sustain", secs(20), 2),
                    ScenarioStage::new("cool-down", secs(5), 0),
                ],
            )],
            Profile::Standard => vec![ScenarioSchedule::new(
                "primary",
                Duration::ZERO,
                vec![
                    ScenarioStage::new("warm-up", secs(10), 5),
                    ScenarioStage::new("ramp", secs(30), 20),
                    ScenarioStage::new("sustain", secs(120), 20),
                    ScenarioStage::new("cool-down", secs(10), 0),
                ],
            )],
            Profile::Stress => vec![
                ScenarioSchedule::new(
                    "primary",
                    Duration::ZERO,
                    vec![
                        ScenarioStage::new("warm-up", secs(10), 10),
                        ScenarioStage::new("ramp", secs(30), 50),
                        ScenarioStage::new("sustain", secs(180), 50),
                        ScenarioStage::new("cool-down", secs(15), 0),
                    ],
                ),
                // spike lands mid-sustain of the primary schedule
                ScenarioSchedule::new(
                    "spike",
                    secs(90),
                    vec![
                        ScenarioStage::new("spike-up", secs(10), 40),
                        ScenarioStage::new("spike-hold", secs(30), 40),
                        ScenarioStage::new("spike-down", secs(10), 0),
                    ],
                ),
            ],
            Profile::Soak => vec![ScenarioSchedule::new(
                "primary",
                Duration::ZERO,
                vec![
                    ScenarioStage::new("warm-up", secs(30), 10),
                    ScenarioStage::new("soak", secs(3600), 10),
                    ScenarioStage::new("cool-down", secs(30), 0),
                ],
            )],
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat schedule used for baseline measurement iterations: a short climb,
/// a steady measurement window, and an immediate stop. Rates computed over
/// the window are not diluted by ramping.
pub fn measurement_schedule(duration: Duration, concurrency: usize) -> Vec<ScenarioSchedule> {
    vec![ScenarioSchedule::new(
        "measurement",
        Duration::ZERO,
        vec![
            ScenarioStage::new("climb", Duration::from_secs(1), concurrency),
            ScenarioStage::new("measure", duration, concurrency),
            ScenarioStage::new("stop", Duration::from_secs(1), 0),
        ],
    )]
}
