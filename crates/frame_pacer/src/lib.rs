use std::time::Duration;

/// Measured durations for the most recently completed cycle. Recomputed
/// every cycle and consumed immediately; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleMeasurement {
    pub paint: Duration,
    pub swap: Duration,
}

/// Outcome of one scheduler cycle, handed to the pacer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleReport {
    /// No surfaces were registered; nothing was painted or measured.
    Idle,
    Completed(CycleMeasurement),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePacerConfig {
    /// Floor on the returned delay. Prevents a runaway repaint loop when
    /// the driver has vertical-sync disabled and swap returns instantly.
    pub min_interval: Duration,
    /// Floor on paint + swap + delay. Caps the framework's own overhead to
    /// roughly 33Hz even when rendering is instantaneous, leaving time for
    /// input handling and the controlling thread's work.
    pub min_cycle: Duration,
    /// Fixed delay between polls while no surfaces are registered.
    pub idle_interval: Duration,
}

impl Default for FramePacerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(5),
            min_cycle: Duration::from_millis(30),
            idle_interval: Duration::from_millis(30),
        }
    }
}

/// Pure pacing computation: how long to wait before starting the next cycle.
///
/// Painting and the controlling thread's own work compete for a shared lock,
/// and most of a paint is spent holding it. Targeting `delay = paint - swap`
/// keeps the lock held for roughly half of each cycle.
#[derive(Debug, Clone)]
pub struct FramePacer {
    config: FramePacerConfig,
}

impl FramePacer {
    pub fn new(config: FramePacerConfig) -> Self {
        if config.min_interval > config.min_cycle {
            panic!(
                "invalid frame pacer config: min_interval ({:?}) exceeds min_cycle ({:?})",
                config.min_interval, config.min_cycle
            );
        }
        Self { config }
    }

    pub fn config(&self) -> FramePacerConfig {
        self.config
    }

    pub fn next_interval(&self, report: CycleReport) -> Duration {
        match report {
            CycleReport::Idle => self.config.idle_interval,
            CycleReport::Completed(measurement) => self.paced_interval(measurement),
        }
    }

    fn paced_interval(&self, measurement: CycleMeasurement) -> Duration {
        let CycleMeasurement { paint, swap } = measurement;
        let mut delay = paint.saturating_sub(swap).max(self.config.min_interval);
        let cycle = paint + swap + delay;
        if cycle < self.config.min_cycle {
            delay = self.config.min_cycle - paint - swap;
        }
        delay
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new(FramePacerConfig::default())
    }
}
