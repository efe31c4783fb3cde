//! Configuration system using Figment.
//!
//! Settings are layered:
//! 1. built-in defaults ([`Settings::default`])
//! 2. an optional TOML file
//! 3. environment variables prefixed with `PULP_`, using `__` between section and key
//!
//! # Environment Variable Overrides
//!
//! ```text
//! PULP_APPLICATION__LOG_LEVEL=debug
//! PULP_SEQUENCER__POLL_INTERVAL_MS=20
//! PULP_REGULATION__PRESSURE_GAIN=0.002
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pulp_daq::config::Settings;
//!
//! let settings = Settings::load(None)?;
//! println!("Poll interval: {:?}", settings.sequencer.poll_interval());
//! # Ok::<(), pulp_daq::error::BatchError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{BatchError, BatchResult};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "PULP_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationSettings,
    /// Sequencer timing
    pub sequencer: SequencerSettings,
    /// Plant-specific wait thresholds
    pub conditions: ConditionSettings,
    /// Cooking regulation tuning
    pub regulation: RegulationSettings,
    /// Simulated plant model
    pub simulator: SimulatorSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "pulp-daq".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, coloured when attached to a terminal.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Sequencer timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerSettings {
    /// Condition poll and regulation tick interval in milliseconds.
    pub poll_interval_ms: u64,
    /// How long EM3_OP8 keeps V204 open to depressurize the digester.
    pub depressurize_hold_ms: u64,
    /// Per-condition timeouts.
    pub timeouts: TimeoutSettings,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            depressurize_hold_ms: 1000,
            timeouts: TimeoutSettings::default(),
        }
    }
}

impl SequencerSettings {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// EM3_OP8 hold as a [`Duration`].
    pub fn depressurize_hold(&self) -> Duration {
        Duration::from_millis(self.depressurize_hold_ms)
    }
}

/// Timeouts for each blocking wait, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Impregnation: digester upper limit switch.
    pub upper_limit_secs: u64,
    /// Black liquor fill: displaced liquor level.
    pub black_liquor_secs: u64,
    /// White liquor fill: displaced liquor level.
    pub white_liquor_secs: u64,
    /// Cooking: digester reaches the target temperature.
    pub cooking_temperature_secs: u64,
    /// Discharge: lower limit switch clears.
    pub digester_drained_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            upper_limit_secs: 30,
            black_liquor_secs: 20,
            white_liquor_secs: 20,
            cooking_temperature_secs: 300,
            digester_drained_secs: 100,
        }
    }
}

/// Comparison applied to a level reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// `reading > level`
    Above,
    /// `reading >= level`
    AtLeast,
    /// `reading < level`
    Below,
    /// `reading <= level`
    AtMost,
}

/// Threshold on a tank level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCondition {
    /// How the reading is compared.
    pub comparison: Comparison,
    /// Level the reading is compared against.
    pub level: i32,
}

impl LevelCondition {
    /// Evaluate the threshold against a reading.
    pub fn is_met(&self, reading: i32) -> bool {
        match self.comparison {
            Comparison::Above => reading > self.level,
            Comparison::AtLeast => reading >= self.level,
            Comparison::Below => reading < self.level,
            Comparison::AtMost => reading <= self.level,
        }
    }
}

/// Thresholds for the liquor displacement waits.
///
/// Plant revisions disagree on the exact threshold, so both the comparison and the level
/// are configurable. Defaults follow the latest revision: `LI400 > 27`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionSettings {
    /// Black liquor fill completes when LI400 meets this threshold.
    pub black_liquor_displaced: LevelCondition,
    /// White liquor fill completes when LI400 meets this threshold.
    pub white_liquor_displaced: LevelCondition,
}

impl Default for ConditionSettings {
    fn default() -> Self {
        let displaced = LevelCondition {
            comparison: Comparison::Above,
            level: 27,
        };
        Self {
            black_liquor_displaced: displaced,
            white_liquor_displaced: displaced,
        }
    }
}

/// Cooking regulation tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulationSettings {
    /// Integrator gain applied to the pressure error each tick.
    pub pressure_gain: f64,
    /// V104 opening when regulation starts, in percent.
    pub initial_valve_opening: f64,
}

impl Default for RegulationSettings {
    fn default() -> Self {
        Self {
            pressure_gain: 0.001,
            initial_valve_opening: 100.0,
        }
    }
}

/// Simulated plant model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    /// Physics tick in milliseconds.
    pub tick_ms: u64,
    /// Level units moved per second by a pump at 100 %.
    pub pump_rate: f64,
    /// Digester capacity in level units; the upper switch trips at capacity.
    pub digester_capacity: f64,
    /// Lower switch trips while the digester holds at least this much.
    pub lower_switch_level: f64,
    /// °C per second while the heater runs with circulation.
    pub heating_rate: f64,
    /// Fraction of the excess over ambient lost per second.
    pub cooling_rate: f64,
    /// Ambient temperature in °C.
    pub ambient_temperature: f64,
    /// Pressure gained per °C above ambient (bar).
    pub pressure_per_degree: f64,
    /// Fraction of the pressure vented per second through a fully open V104.
    pub vent_rate: f64,
    /// Initial white liquor tank level.
    pub initial_li100: f64,
    /// Initial impregnation tank level.
    pub initial_li200: f64,
    /// Initial black liquor tank level.
    pub initial_li400: f64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            pump_rate: 20.0,
            digester_capacity: 60.0,
            lower_switch_level: 5.0,
            heating_rate: 5.0,
            cooling_rate: 0.01,
            ambient_temperature: 20.0,
            pressure_per_degree: 0.5,
            vent_rate: 0.5,
            initial_li100: 80.0,
            initial_li200: 80.0,
            initial_li400: 60.0,
        }
    }
}

impl SimulatorSettings {
    /// Physics tick as a [`Duration`].
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Settings {
    /// Build the layered figment without extracting it.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load settings from defaults, an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> BatchResult<Self> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(BatchError::Configuration(format!(
                    "configuration file {} not found",
                    path.display()
                )));
            }
        }
        Self::from_figment(Self::figment(path))
    }

    /// Extract and validate settings from any figment.
    pub fn from_figment(figment: Figment) -> BatchResult<Self> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the sequencer cannot run with.
    pub fn validate(&self) -> BatchResult<()> {
        let fail = |msg: &str| -> BatchResult<()> { Err(BatchError::Configuration(msg.to_string())) };

        if self.sequencer.poll_interval_ms == 0 {
            return fail("sequencer.poll_interval_ms must be greater than zero");
        }
        let t = &self.sequencer.timeouts;
        if [
            t.upper_limit_secs,
            t.black_liquor_secs,
            t.white_liquor_secs,
            t.cooking_temperature_secs,
            t.digester_drained_secs,
        ]
        .contains(&0)
        {
            return fail("sequencer.timeouts must all be greater than zero");
        }
        if !(self.regulation.pressure_gain.is_finite() && self.regulation.pressure_gain > 0.0) {
            return fail("regulation.pressure_gain must be a positive number");
        }
        if !(0.0..=100.0).contains(&self.regulation.initial_valve_opening) {
            return fail("regulation.initial_valve_opening must be within 0..=100");
        }
        if self.simulator.tick_ms == 0 {
            return fail("simulator.tick_ms must be greater than zero");
        }
        if self.simulator.digester_capacity <= self.simulator.lower_switch_level {
            return fail("simulator.digester_capacity must exceed simulator.lower_switch_level");
        }
        Ok(())
    }
}
