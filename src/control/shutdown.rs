#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Armed(u32),
    Triggered,
}

/// Outcome of one [`ShutdownEscalator::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStep {
    /// No critical battery seen yet.
    Idle,
    /// Critical battery seen for the first time on this tick.
    Armed,
    /// Armed and waiting; carries the tick count including the arming tick.
    Counting(u32),
    /// Dwell elapsed on this tick. The power-down sequence must run now.
    Trigger,
    /// Shutdown already triggered earlier.
    Spent,
}

/// Debounce between the first critical-battery reading and the forced power-down.
///
/// Once armed the counter advances every tick and never resets, even if the voltage
/// recovers. [`EscalationStep::Trigger`] is returned exactly once.
#[derive(Debug, Clone)]
pub struct ShutdownEscalator {
    dwell_ticks: u32,
    phase: Phase,
}

impl ShutdownEscalator {
    pub fn new(dwell_ticks: u32) -> Self {
        Self {
            dwell_ticks,
            phase: Phase::Idle,
        }
    }

    pub fn tick(&mut self, critical: bool) -> EscalationStep {
        match self.phase {
            Phase::Idle if critical => {
                self.phase = Phase::Armed(1);
                EscalationStep::Armed
            }
            Phase::Idle => EscalationStep::Idle,
            Phase::Armed(ticks) => {
                let ticks = ticks.saturating_add(1);
                if ticks > self.dwell_ticks {
                    self.phase = Phase::Triggered;
                    EscalationStep::Trigger
                } else {
                    self.phase = Phase::Armed(ticks);
                    EscalationStep::Counting(ticks)
                }
            }
            Phase::Triggered => EscalationStep::Spent,
        }
    }

    /// True from the arming tick on, including after the trigger.
    pub fn is_armed(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn is_triggered(&self) -> bool {
        self.phase == Phase::Triggered
    }

    /// Ticks counted since arming, if armed and not yet triggered.
    pub fn ticks(&self) -> Option<u32> {
        match self.phase {
            Phase::Armed(ticks) => Some(ticks),
            Phase::Idle | Phase::Triggered => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_idle_until_critical() {
        let mut escalator = ShutdownEscalator::new(12);
        for _ in 0..50 {
            assert_eq!(escalator.tick(false), EscalationStep::Idle);
        }
        assert!(!escalator.is_armed());
    }

    #[test]
    fn triggers_on_thirteenth_tick_after_arming_despite_recovery() {
        let mut escalator = ShutdownEscalator::new(12);
        assert_eq!(escalator.tick(true), EscalationStep::Armed);
        for expected in 2..=12 {
            assert_eq!(escalator.tick(false), EscalationStep::Counting(expected));
        }
        assert_eq!(escalator.ticks(), Some(12));
        assert_eq!(escalator.tick(false), EscalationStep::Trigger);
        assert!(escalator.is_triggered());
    }

    #[test]
    fn trigger_fires_once() {
        let mut escalator = ShutdownEscalator::new(1);
        escalator.tick(true);
        assert_eq!(escalator.tick(true), EscalationStep::Trigger);
        assert_eq!(escalator.tick(true), EscalationStep::Spent);
        assert_eq!(escalator.tick(false), EscalationStep::Spent);
        assert!(escalator.is_armed());
    }
}
