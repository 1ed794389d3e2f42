use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use serde::Serialize;

use crate::{
    app::{FailureLatch, LogLevel, Logger},
    control::{
        fan::{FanController, FanOutput, FanState},
        power::PowerControl,
        shutdown::{EscalationStep, ShutdownEscalator},
    },
    display::overlays::{desired_overlays, OverlayCategory, OverlayManager, OverlayRenderer, ReconcileReport},
    sensors::Sensors,
    state::{SensorSource, StateChanges, StateTracker, SystemState, VoltageBounds},
};

/// Requests delivered to the monitor between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    Quit,
    Reboot,
    PowerOff,
}

/// Why [`Monitor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Quit,
    Reboot,
    PowerOff,
    BatteryCritical,
}

/// Tunables fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    pub bounds: VoltageBounds,
    pub fan_on_temp_c: f32,
    pub fan_cooldown_ticks: u32,
    pub shutdown_dwell_ticks: u32,
    pub interval: Duration,
}

/// Everything one tick observed and did.
#[derive(Debug)]
pub struct TickOutcome {
    pub state: SystemState,
    pub changes: StateChanges,
    pub cpu_temp_c: Option<f32>,
    pub fan: FanState,
    pub escalation: EscalationStep,
    pub overlays: ReconcileReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Fault {
    Sensor(SensorSource),
    Overlay(OverlayCategory),
    Fan,
}

#[derive(Serialize)]
struct TickReport<'a> {
    state: &'a SystemState,
    cpu_temp_c: Option<f32>,
    fan: FanState,
    shutdown_ticks: Option<u32>,
    overlays: Vec<&'static str>,
}

/// The sampling loop: sensors, state, overlays, fan and shutdown escalation.
///
/// Owns every piece of monitor state; the only input from other threads is the
/// [`LoopSignal`] channel, drained while waiting for the next tick.
pub struct Monitor<S, R, F, P>
where
    S: Sensors,
    R: OverlayRenderer,
    F: FanOutput,
    P: PowerControl,
{
    settings: MonitorSettings,
    sensors: S,
    tracker: StateTracker,
    overlays: OverlayManager<R>,
    fan: FanController,
    fan_output: F,
    applied_fan: Option<FanState>,
    escalator: ShutdownEscalator,
    power: P,
    faults: FailureLatch<Fault>,
    logger: Arc<Logger>,
}

impl<S, R, F, P> Monitor<S, R, F, P>
where
    S: Sensors,
    R: OverlayRenderer,
    F: FanOutput,
    P: PowerControl,
{
    pub fn new(
        settings: MonitorSettings,
        sensors: S,
        overlays: OverlayManager<R>,
        fan_output: F,
        power: P,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            tracker: StateTracker::new(settings.bounds),
            fan: FanController::new(settings.fan_on_temp_c, settings.fan_cooldown_ticks),
            escalator: ShutdownEscalator::new(settings.shutdown_dwell_ticks),
            settings,
            sensors,
            overlays,
            fan_output,
            applied_fan: None,
            power,
            faults: FailureLatch::default(),
            logger,
        }
    }

    /// One pass of sample, derive, reconcile, fan and escalation.
    pub fn tick(&mut self) -> TickOutcome {
        let tick = self.tracker.update(&mut self.sensors);
        self.report_sensor_faults(&tick.failures);

        let escalation = self.escalator.tick(tick.state.critical);
        if escalation == EscalationStep::Armed {
            let grace = self.settings.interval * self.settings.shutdown_dwell_ticks;
            self.logger.warn(format!(
                "battery voltage at or below {:.2}V, shutting down in {}s",
                self.settings.bounds.vmin,
                grace.as_secs()
            ));
        }

        let desired = desired_overlays(&tick.state, self.escalator.is_armed());
        let overlays = self.overlays.reconcile(&desired);
        self.report_overlay_faults(&overlays);

        if let Some(temp) = tick.cpu_temp_c {
            let state = self.fan.update(temp);
            self.apply_fan(state);
        }

        if escalation == EscalationStep::Trigger {
            self.logger.error(format!(
                "battery critical for {} ticks, powering off",
                self.settings.shutdown_dwell_ticks
            ));
            if let Err(err) = self.power.power_off() {
                self.logger.error(format!("power-off sequence failed: {err}"));
            }
        }

        let outcome = TickOutcome {
            state: tick.state,
            changes: tick.changes,
            cpu_temp_c: tick.cpu_temp_c,
            fan: self.fan.state(),
            escalation,
            overlays,
        };
        self.log_tick(&outcome);
        outcome
    }

    /// Ticks every interval until a signal or the battery ends the loop.
    pub fn run(&mut self, signals: &Receiver<LoopSignal>) -> ExitReason {
        self.apply_fan(FanState::Off);
        let exit = loop {
            let started = Instant::now();
            if self.tick().escalation == EscalationStep::Trigger {
                break ExitReason::BatteryCritical;
            }
            if let Some(exit) = self.wait(signals, started + self.settings.interval) {
                break exit;
            }
        };
        for (category, err) in self.overlays.clear_all() {
            self.logger
                .warn(format!("failed to remove {} overlay: {err}", category.as_str()));
        }
        exit
    }

    fn wait(&mut self, signals: &Receiver<LoopSignal>, deadline: Instant) -> Option<ExitReason> {
        loop {
            match signals.recv_deadline(deadline) {
                Ok(signal) => {
                    if let Some(exit) = self.handle_signal(signal) {
                        return Some(exit);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => {
                    thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    return None;
                }
            }
        }
    }

    fn handle_signal(&mut self, signal: LoopSignal) -> Option<ExitReason> {
        match signal {
            LoopSignal::Quit => {
                self.logger.info("stopping");
                Some(ExitReason::Quit)
            }
            LoopSignal::Reboot => {
                self.logger.info("reboot requested");
                match self.power.reboot() {
                    Ok(()) => Some(ExitReason::Reboot),
                    Err(err) => {
                        self.logger.error(format!("reboot failed: {err}"));
                        None
                    }
                }
            }
            LoopSignal::PowerOff => {
                self.logger.info("power-off requested");
                match self.power.power_off() {
                    Ok(()) => Some(ExitReason::PowerOff),
                    Err(err) => {
                        self.logger.error(format!("power-off failed: {err}"));
                        None
                    }
                }
            }
        }
    }

    /// Drives the fan output only when the wanted state differs from the last one applied.
    fn apply_fan(&mut self, state: FanState) {
        if self.applied_fan == Some(state) {
            return;
        }
        match self.fan_output.set(state) {
            Ok(()) => {
                self.applied_fan = Some(state);
                if self.faults.recover(&Fault::Fan) {
                    self.logger.info("fan output recovered");
                }
                self.logger.debug(format!("fan {state:?}"));
            }
            Err(err) => {
                if self.faults.fail(Fault::Fan) {
                    self.logger.warn(format!("fan output failed: {err}"));
                }
            }
        }
    }

    fn report_sensor_faults(&mut self, failures: &[crate::state::SensorFailure]) {
        for failure in failures {
            if self.faults.fail(Fault::Sensor(failure.source)) {
                self.logger.warn(format!(
                    "{} read failed: {}",
                    failure.source.as_str(),
                    failure.error
                ));
            }
        }
        for source in SensorSource::ALL {
            let still_failing = failures.iter().any(|f| f.source == source);
            if !still_failing && self.faults.recover(&Fault::Sensor(source)) {
                self.logger.info(format!("{} readable again", source.as_str()));
            }
        }
    }

    fn report_overlay_faults(&mut self, report: &ReconcileReport) {
        for (category, err) in &report.errors {
            if self.faults.fail(Fault::Overlay(*category)) {
                self.logger
                    .warn(format!("{} overlay failed: {err}", category.as_str()));
            }
        }
        for category in &report.spawned {
            if self.faults.recover(&Fault::Overlay(*category)) {
                self.logger
                    .info(format!("{} overlay showing again", category.as_str()));
            }
        }
    }

    fn log_tick(&self, outcome: &TickOutcome) {
        if !self.logger.enabled(LogLevel::Debug) {
            return;
        }
        let report = TickReport {
            state: &outcome.state,
            cpu_temp_c: outcome.cpu_temp_c,
            fan: outcome.fan,
            shutdown_ticks: self.escalator.ticks(),
            overlays: self
                .overlays
                .live_categories()
                .iter()
                .map(OverlayCategory::as_str)
                .collect(),
        };
        if let Ok(json) = serde_json::to_string(&report) {
            self.logger.debug(json);
        }
    }

    pub fn overlays(&self) -> &OverlayManager<R> {
        &self.overlays
    }

    pub fn fan_output(&self) -> &F {
        &self.fan_output
    }

    pub fn power(&self) -> &P {
        &self.power
    }

    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }

    pub fn escalator(&self) -> &ShutdownEscalator {
        &self.escalator
    }

    #[cfg(test)]
    fn is_faulted_sensor(&self, source: SensorSource) -> bool {
        self.faults.is_failing(&Fault::Sensor(source))
    }
}
