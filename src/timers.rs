//! Cancellable per-instance timer slots.
//!
//! A state machine owns one [`Timer`] per logical flow (equip flow, fire
//! rate, run-fire delay). Scheduling replaces whatever was pending, so at
//! most one task per slot is ever live. Expired actions are pulled with
//! [`Timer::poll`] and dispatched by the owner.

use serde::{Deserialize, Serialize};

use crate::constants::KINDA_SMALL_NUMBER;

/// Identifies one scheduling of a timer slot. Stale after the slot is re-set or cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerHandle(u64);

#[derive(Debug, Clone, PartialEq)]
struct Scheduled<A> {
    action: A,
    remaining: f32,
    period: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timer<A: Clone> {
    scheduled: Option<Scheduled<A>>,
    generation: u64,
    fired: u32,
}

impl<A: Clone> Default for Timer<A> {
    fn default() -> Self {
        Self {
            scheduled: None,
            generation: 0,
            fired: 0,
        }
    }
}

impl<A: Clone> Timer<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-shot task after `delay` seconds. Replaces any pending task.
    pub fn set(&mut self, action: A, delay: f32) -> TimerHandle {
        self.schedule(action, delay.max(0.0), None)
    }

    /// Repeating task; first expiry after `period`, then every `period`.
    pub fn set_repeating(&mut self, action: A, period: f32) -> TimerHandle {
        let period = period.max(KINDA_SMALL_NUMBER);
        self.schedule(action, period, Some(period))
    }

    fn schedule(&mut self, action: A, remaining: f32, period: Option<f32>) -> TimerHandle {
        self.generation += 1;
        self.fired = 0;
        self.scheduled = Some(Scheduled {
            action,
            remaining,
            period,
        });
        TimerHandle(self.generation)
    }

    pub fn clear(&mut self) {
        if self.scheduled.take().is_some() {
            self.generation += 1;
        }
        self.fired = 0;
    }

    pub fn is_active(&self) -> bool {
        self.scheduled.is_some()
    }

    pub fn is_handle_active(&self, handle: TimerHandle) -> bool {
        self.is_active() && handle.0 == self.generation
    }

    pub fn remaining(&self) -> Option<f32> {
        self.scheduled.as_ref().map(|s| s.remaining.max(0.0))
    }

    pub fn action(&self) -> Option<&A> {
        self.scheduled.as_ref().map(|s| &s.action)
    }

    pub fn advance(&mut self, dt: f32) {
        if let Some(scheduled) = self.scheduled.as_mut() {
            scheduled.remaining -= dt.max(0.0);
        }
    }

    /// Next expired action, if any.
    ///
    /// A repeating task can expire several times in one long step; each
    /// expiry is returned by a separate call. The owner may re-set or clear
    /// the slot between polls and the new schedule takes effect at once.
    pub fn poll(&mut self) -> Option<A> {
        let scheduled = self.scheduled.as_mut()?;
        if scheduled.remaining > 0.0 {
            return None;
        }

        let action = scheduled.action.clone();
        match scheduled.period {
            Some(period) => {
                scheduled.remaining += period;
                self.fired += 1;
            }
            None => {
                self.scheduled = None;
                self.generation += 1;
                self.fired = 0;
            }
        }
        Some(action)
    }

    /// Expiries of the current repeating schedule so far.
    pub fn fired_count(&self) -> u32 {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Flow {
        Unequip,
        Equip,
    }

    #[test]
    fn test_one_shot_fires_once() {
        let mut timer = Timer::new();
        timer.set(Flow::Equip, 0.5);
        timer.advance(0.4);
        assert_eq!(timer.poll(), None);
        timer.advance(0.1);
        assert_eq!(timer.poll(), Some(Flow::Equip));
        assert_eq!(timer.poll(), None);
        assert!(!timer.is_active());
    }

    #[test]
    fn test_set_replaces_pending() {
        let mut timer = Timer::new();
        let first = timer.set(Flow::Unequip, 0.2);
        let second = timer.set(Flow::Equip, 1.0);
        assert!(!timer.is_handle_active(first));
        assert!(timer.is_handle_active(second));
        timer.advance(0.5);
        assert_eq!(timer.poll(), None);
        timer.advance(0.5);
        assert_eq!(timer.poll(), Some(Flow::Equip));
    }

    #[test]
    fn test_zero_delay_is_immediately_due() {
        let mut timer = Timer::new();
        timer.set(Flow::Equip, 0.0);
        assert_eq!(timer.poll(), Some(Flow::Equip));
    }

    #[test]
    fn test_repeating_catches_up() {
        let mut timer = Timer::new();
        timer.set_repeating(Flow::Equip, 0.1);
        timer.advance(0.35);
        let mut count = 0;
        while timer.poll().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(timer.fired_count(), 3);
        assert!(timer.is_active());
        let remaining = timer.remaining().unwrap();
        assert!((remaining - 0.05).abs() < 1e-4);
    }

    #[test]
    fn test_clear_between_polls_stops_repeats() {
        let mut timer = Timer::new();
        timer.set_repeating(Flow::Equip, 0.1);
        timer.advance(0.5);
        assert!(timer.poll().is_some());
        timer.clear();
        assert_eq!(timer.poll(), None);
        assert_eq!(timer.remaining(), None);
    }
}
