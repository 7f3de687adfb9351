//! Human-behaviour simulation.
//!
//! Cosmetic only: a short burst of scrolls, pointer moves and pauses between
//! meaningful page actions. Failures are logged and never abort a fetch.

use rand::Rng;
use std::ops::Range;
use std::time::Duration;
use tokio::time::sleep;

use super::BrowserSession;

#[derive(Debug, Clone, PartialEq)]
pub enum HumanAction {
    Scroll { delta_y: i32, pause: Duration },
    PointerMove { x: f64, y: f64, pause: Duration },
    Pause(Duration),
}

/// Produces and performs randomized action bursts.
#[derive(Debug, Clone)]
pub struct BehaviorSimulator {
    actions: Range<usize>,
    pause_scale: f64,
}

impl Default for BehaviorSimulator {
    fn default() -> Self {
        Self {
            actions: 1..4,
            pause_scale: 1.0,
        }
    }
}

impl BehaviorSimulator {
    /// Never performs any action.
    pub fn disabled() -> Self {
        Self {
            actions: 0..0,
            pause_scale: 0.0,
        }
    }

    /// Keep the action mix but scale every pause (0.0 removes waiting).
    pub fn with_pause_scale(mut self, scale: f64) -> Self {
        self.pause_scale = scale.max(0.0);
        self
    }

    fn pause<R: Rng + ?Sized>(&self, rng: &mut R, secs: Range<f64>) -> Duration {
        Duration::from_secs_f64(rng.gen_range(secs) * self.pause_scale)
    }

    pub fn plan<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<HumanAction> {
        if self.actions.is_empty() {
            return Vec::new();
        }
        let count = rng.gen_range(self.actions.clone());
        (0..count)
            .map(|_| match rng.gen_range(0..3) {
                0 => {
                    let distance = rng.gen_range(100..=500);
                    let delta_y = if rng.gen_bool(0.5) { distance } else { -distance };
                    HumanAction::Scroll {
                        delta_y,
                        pause: self.pause(rng, 0.5..1.5),
                    }
                }
                1 => HumanAction::PointerMove {
                    x: rng.gen_range(100.0..1800.0),
                    y: rng.gen_range(100.0..900.0),
                    pause: self.pause(rng, 0.1..0.5),
                },
                _ => HumanAction::Pause(self.pause(rng, 0.5..2.0)),
            })
            .collect()
    }

    pub async fn perform(&self, session: &mut dyn BrowserSession, actions: &[HumanAction]) {
        for action in actions {
            let (result, pause) = match action {
                HumanAction::Scroll { delta_y, pause } => (session.scroll_by(*delta_y).await, *pause),
                HumanAction::PointerMove { x, y, pause } => (session.move_pointer(*x, *y).await, *pause),
                HumanAction::Pause(pause) => (Ok(()), *pause),
            };
            if let Err(err) = result {
                log::debug!("human simulation step skipped: {err}");
            }
            if !pause.is_zero() {
                sleep(pause).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn plans_one_to_three_bounded_actions() {
        let simulator = BehaviorSimulator::default();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let plan = simulator.plan(&mut rng);
            assert!((1..=3).contains(&plan.len()));
            for action in plan {
                match action {
                    HumanAction::Scroll { delta_y, pause } => {
                        assert!((100..=500).contains(&delta_y.abs()));
                        assert!(pause >= Duration::from_millis(500) && pause < Duration::from_millis(1500));
                    }
                    HumanAction::PointerMove { x, y, .. } => {
                        assert!((100.0..1800.0).contains(&x));
                        assert!((100.0..900.0).contains(&y));
                    }
                    HumanAction::Pause(pause) => assert!(pause < Duration::from_secs(2)),
                }
            }
        }
    }

    #[test]
    fn disabled_simulator_plans_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(BehaviorSimulator::disabled().plan(&mut rng).is_empty());
    }
}
