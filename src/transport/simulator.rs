//! Simulated digester plant.
//!
//! A coarse mass-and-heat model of the four tanks, enough to carry a batch through every
//! phase from the CLI without field hardware. Levels move at the pump rate along whichever
//! route the open valves form; the digester heats while the heater runs with circulation,
//! cools toward ambient otherwise, and its pressure follows temperature minus what V104 and
//! V204 vent.
//!
//! [`SimulatedPlant::spawn`] starts a background tick task that holds only a weak reference,
//! so dropping the last `Arc` stops the simulation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{check_percent, PointValue, ProcessTransport};
use crate::config::SimulatorSettings;
use crate::error::TransportError;
use crate::operations::{
    E100, NEUTRAL_STATE, P100, P200, PUMPS_PRESET, V102, V103, V104, V204, V301, V302, V303,
    V304, V401, V404,
};
use crate::process::{
    ProcessSnapshot, SnapshotFeed, TagValue, TAG_LI100, TAG_LI200, TAG_LI400, TAG_LS_MINUS_300,
    TAG_LS_PLUS_300, TAG_PI300, TAG_TI300,
};

/// Level ceiling for the storage tanks.
const TANK_CAPACITY: f64 = 200.0;

/// Tank and digester state.
#[derive(Debug, Clone, PartialEq)]
struct PlantModel {
    t100: f64,
    t200: f64,
    t300: f64,
    t400: f64,
    temperature: f64,
    pressure: f64,
}

impl PlantModel {
    fn new(settings: &SimulatorSettings) -> Self {
        Self {
            t100: settings.initial_li100,
            t200: settings.initial_li200,
            t300: 0.0,
            t400: settings.initial_li400,
            temperature: settings.ambient_temperature,
            pressure: 0.0,
        }
    }

    fn snapshot(&self, settings: &SimulatorSettings) -> [(&'static str, TagValue); 7] {
        [
            (TAG_LI100, TagValue::Int(self.t100.round() as i32)),
            (TAG_LI200, TagValue::Int(self.t200.round() as i32)),
            (TAG_LI400, TagValue::Int(self.t400.round() as i32)),
            (TAG_PI300, TagValue::Int(self.pressure.round() as i32)),
            (TAG_TI300, TagValue::Float(self.temperature)),
            (
                TAG_LS_PLUS_300,
                TagValue::Bool(self.t300 >= settings.digester_capacity),
            ),
            (
                TAG_LS_MINUS_300,
                TagValue::Bool(self.t300 >= settings.lower_switch_level),
            ),
        ]
    }

    fn advance(&mut self, valves: &Valves<'_>, settings: &SimulatorSettings, dt: f64) {
        let capacity = settings.digester_capacity;

        // P200 line
        let p200 = valves.percent(P200);
        if p200 > 0.0 && valves.is_open(V303) {
            let flow = settings.pump_rate * p200 / 100.0 * dt;
            if valves.is_open(V302) && valves.is_open(V103) {
                // Discharge: digester back to the white liquor tank.
                let moved = flow.min(self.t300).min(TANK_CAPACITY - self.t100).max(0.0);
                self.t300 -= moved;
                self.t100 += moved;
            } else if valves.is_open(V301) {
                let source = if valves.is_open(V404) {
                    &mut self.t400
                } else {
                    &mut self.t200
                };
                let moved = flow.min(*source);
                *source -= moved;
                let room = (capacity - self.t300).max(0.0);
                let kept = moved.min(room);
                self.t300 += kept;
                let overflow = moved - kept;
                if valves.is_open(V204) {
                    self.t200 = (self.t200 + overflow).min(TANK_CAPACITY);
                }
            }
        }

        // P100 line
        let p100 = valves.percent(P100);
        let circulating = p100 > 0.0 && valves.percent(V102) > 0.0 && valves.is_open(V304);
        if circulating && valves.is_open(V301) {
            let flow = settings.pump_rate * p100 / 100.0 * dt;
            let moved = flow.min(self.t100);
            let room = (capacity - self.t300).max(0.0);
            let kept = moved.min(room);
            self.t100 -= kept;
            self.t300 += kept;
            // Without V401 the surplus circulates back to T100 and nothing moves.
            if valves.is_open(V401) {
                let overflow = moved - kept;
                self.t100 -= overflow;
                self.t400 = (self.t400 + overflow).min(TANK_CAPACITY);
            }
        }

        // Heat
        let ambient = settings.ambient_temperature;
        if valves.is_open(E100) && circulating {
            self.temperature += settings.heating_rate * dt;
        } else {
            self.temperature -= (self.temperature - ambient) * settings.cooling_rate * dt;
        }

        // Pressure follows temperature and vents through V104 / V204.
        let equilibrium = ((self.temperature - ambient) * settings.pressure_per_degree).max(0.0);
        self.pressure += (equilibrium - self.pressure) * dt.min(1.0);
        let mut vent = settings.vent_rate * valves.percent(V104) / 100.0;
        if valves.is_open(V204) {
            vent = 1.0;
        }
        self.pressure -= self.pressure * (vent * dt).min(1.0);
        self.pressure = self.pressure.max(0.0);
    }
}

/// Read-only view on the actuator map.
struct Valves<'a>(&'a HashMap<String, PointValue>);

impl Valves<'_> {
    fn is_open(&self, point: &str) -> bool {
        self.0.get(point).is_some_and(|value| !value.is_neutral())
    }

    fn percent(&self, point: &str) -> f64 {
        match self.0.get(point) {
            Some(PointValue::Analog(percent)) => f64::from(*percent),
            Some(PointValue::Digital(true)) => 100.0,
            _ => 0.0,
        }
    }
}

/// In-process plant simulation implementing [`ProcessTransport`].
#[derive(Debug)]
pub struct SimulatedPlant {
    settings: SimulatorSettings,
    actuators: Mutex<HashMap<String, PointValue>>,
    model: Mutex<PlantModel>,
    feed: SnapshotFeed,
    connected: AtomicBool,
}

impl SimulatedPlant {
    /// Create a plant with every actuator neutral. No background task is started; call
    /// [`SimulatedPlant::step`] to advance it manually.
    pub fn new(settings: SimulatorSettings) -> Self {
        let model = PlantModel::new(&settings);
        let feed = SnapshotFeed::default();
        feed.apply_items(model.snapshot(&settings));

        let mut actuators: HashMap<String, PointValue> = NEUTRAL_STATE
            .iter()
            .map(|(point, value)| (point.to_string(), *value))
            .collect();
        actuators.insert(PUMPS_PRESET.to_string(), PointValue::Digital(false));

        Self {
            settings,
            actuators: Mutex::new(actuators),
            model: Mutex::new(model),
            feed,
            connected: AtomicBool::new(true),
        }
    }

    /// Create a plant and start its tick task on the current runtime.
    pub fn spawn(settings: SimulatorSettings) -> Arc<Self> {
        let tick = settings.tick();
        let plant = Arc::new(Self::new(settings));
        let weak: Weak<Self> = Arc::downgrade(&plant);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(plant) = weak.upgrade() else {
                    debug!("Simulated plant dropped, stopping tick task");
                    break;
                };
                plant.step(tick);
            }
        });

        info!(tick_ms = tick.as_millis() as u64, "Simulated plant started");
        plant
    }

    /// Advance the model by `dt` and publish the new readings.
    pub fn step(&self, dt: Duration) {
        let actuators = self.actuators.lock();
        let mut model = self.model.lock();
        model.advance(&Valves(&actuators), &self.settings, dt.as_secs_f64());
        self.feed.apply_items(model.snapshot(&self.settings));
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<ProcessSnapshot> {
        self.feed.subscribe()
    }

    /// Current value of an actuator.
    pub fn actuator(&self, point: &str) -> Option<PointValue> {
        self.actuators.lock().get(point).copied()
    }

    /// Restore the link.
    pub fn connect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!("Simulated plant connected");
        }
    }

    /// Drop the link. Returns `false` if it was already down.
    pub fn disconnect(&self) -> bool {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            warn!("Simulated plant disconnected");
        }
        was_connected
    }

    fn write(&self, name: &str, value: PointValue) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let mut actuators = self.actuators.lock();
        match actuators.get_mut(name) {
            Some(slot) => {
                *slot = value;
                debug!(point = name, %value, "Actuator written");
                Ok(())
            }
            None => Err(TransportError::UnknownPoint(name.to_string())),
        }
    }
}

#[async_trait]
impl ProcessTransport for SimulatedPlant {
    async fn write_digital(&self, name: &str, value: bool) -> Result<(), TransportError> {
        self.write(name, PointValue::Digital(value))
    }

    async fn write_analog(&self, name: &str, percent: u8) -> Result<(), TransportError> {
        check_percent(name, percent)?;
        self.write(name, PointValue::Analog(percent))
    }

    fn snapshot(&self) -> ProcessSnapshot {
        self.feed.current()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
