//! Stepper motor driven while a track plays.
//!
//! The motor runs a four-coil phase sequence on its own thread. The sequence,
//! speed, and pin backend are all data, so the control loop only starts and
//! stops it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Coil levels for one step (IN1..IN4).
pub type Phase = [bool; 4];

/// Half-step sequence for a 28BYJ-48 style unipolar stepper.
pub const HALF_STEP_SEQUENCE: [Phase; 8] = [
    [true, false, false, false],
    [true, true, false, false],
    [false, true, false, false],
    [false, true, true, false],
    [false, false, true, false],
    [false, false, true, true],
    [false, false, false, true],
    [true, false, false, true],
];

/// Output pins for the four coils.
pub trait PhasePins: Send + 'static {
    fn set_phase(&mut self, phase: Phase);

    /// De-energize all coils.
    fn release(&mut self) {
        self.set_phase([false; 4]);
    }
}

/// Host stand-in for GPIO: logs phases at trace level.
#[derive(Debug, Default)]
pub struct LogPins;

impl PhasePins for LogPins {
    fn set_phase(&mut self, phase: Phase) {
        tracing::trace!(?phase, "motor phase");
    }
}

#[derive(Clone, Debug)]
pub struct MotorConfig {
    pub enabled: bool,
    pub sequence: Vec<Phase>,
    pub steps_per_revolution: u32,
    pub rpm: u32,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sequence: HALF_STEP_SEQUENCE.to_vec(),
            steps_per_revolution: 2048,
            rpm: 33,
        }
    }
}

impl MotorConfig {
    /// Delay between phase changes for the configured speed.
    pub fn step_delay(&self) -> Duration {
        let steps_per_minute =
            u64::from(self.steps_per_revolution.max(1)) * u64::from(self.rpm.max(1));
        Duration::from_micros(60_000_000 / steps_per_minute)
    }
}

/// Start/stop seam used by the control loop.
pub trait Motor {
    fn start(&mut self);
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

struct Running<P> {
    stop: Arc<AtomicBool>,
    join: thread::JoinHandle<P>,
}

/// Stepper driven from a background thread.
///
/// The pins move into the thread on [`Motor::start`] and come back on
/// [`Motor::stop`].
pub struct StepperMotor<P: PhasePins> {
    config: MotorConfig,
    pins: Option<P>,
    running: Option<Running<P>>,
    steps: Arc<AtomicU64>,
}

impl<P: PhasePins> StepperMotor<P> {
    pub fn new(config: MotorConfig, pins: P) -> Self {
        Self {
            config,
            pins: Some(pins),
            running: None,
            steps: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total phase changes issued so far.
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }
}

impl<P: PhasePins> Motor for StepperMotor<P> {
    fn start(&mut self) {
        if !self.config.enabled || self.running.is_some() || self.config.sequence.is_empty() {
            return;
        }
        let Some(mut pins) = self.pins.take() else {
            return;
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stop_t = stop.clone();
        let steps = self.steps.clone();
        let sequence = self.config.sequence.clone();
        let delay = self.config.step_delay();
        tracing::debug!(delay_us = delay.as_micros() as u64, "motor starting");

        let join = thread::spawn(move || {
            for phase in sequence.iter().cycle() {
                if stop_t.load(Ordering::Relaxed) {
                    break;
                }
                pins.set_phase(*phase);
                steps.fetch_add(1, Ordering::Relaxed);
                thread::sleep(delay);
            }
            pins.release();
            pins
        });
        self.running = Some(Running { stop, join });
    }

    fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.stop.store(true, Ordering::Relaxed);
        match running.join.join() {
            Ok(pins) => self.pins = Some(pins),
            Err(_) => tracing::error!("motor thread panicked; motor disabled"),
        }
        tracing::debug!(steps = self.steps(), "motor stopped");
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl<P: PhasePins> Drop for StepperMotor<P> {
    fn drop(&mut self) {
        self.stop();
    }
}
