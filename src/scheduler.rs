//! Fixed-period cooperative ticker.
//!
//! One closure call per period on the calling thread. A tick that overruns
//! its period delays the next one; ticks never overlap.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticker {
    period: Duration,
}

impl Ticker {
    pub fn new(period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(anyhow!("tick period must be greater than zero"));
        }
        Ok(Self { period })
    }

    pub fn from_millis(ms: u64) -> Result<Self> {
        Self::new(Duration::from_millis(ms))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Call `tick` once per period until it breaks, errors, or `stop` is set.
    ///
    /// Returns the number of ticks executed.
    pub fn run<F>(&self, stop: &AtomicBool, mut tick: F) -> Result<u64>
    where
        F: FnMut() -> Result<ControlFlow<()>>,
    {
        let mut ticks = 0u64;
        let mut next_deadline = Instant::now();
        while !stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now < next_deadline {
                std::thread::sleep(next_deadline - now);
            }
            let started = Instant::now();
            ticks += 1;
            if tick()?.is_break() {
                break;
            }
            let elapsed = started.elapsed();
            if elapsed > self.period {
                log::debug!(
                    "tick {} overran its period ({:?} > {:?})",
                    ticks,
                    elapsed,
                    self.period
                );
                next_deadline = Instant::now();
            } else {
                next_deadline = started + self.period;
            }
        }
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_period_is_rejected() {
        assert!(Ticker::from_millis(0).is_err());
    }

    #[test]
    fn runs_until_break() -> Result<()> {
        let ticker = Ticker::from_millis(1)?;
        let stop = AtomicBool::new(false);
        let mut calls = 0;
        let ticks = ticker.run(&stop, || {
            calls += 1;
            Ok(if calls == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })?;
        assert_eq!(ticks, 3);
        assert_eq!(calls, 3);
        Ok(())
    }

    #[test]
    fn paces_ticks_by_period() -> Result<()> {
        let ticker = Ticker::from_millis(10)?;
        let stop = AtomicBool::new(false);
        let started = Instant::now();
        let mut calls = 0;
        ticker.run(&stop, || {
            calls += 1;
            Ok(if calls == 4 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })?;
        // Four ticks span three full periods.
        assert!(started.elapsed() >= Duration::from_millis(30));
        Ok(())
    }

    #[test]
    fn stop_flag_and_errors_end_the_loop() -> Result<()> {
        let ticker = Ticker::from_millis(1)?;
        let stop = AtomicBool::new(true);
        assert_eq!(ticker.run(&stop, || Ok(ControlFlow::Continue(())))?, 0);

        let stop = AtomicBool::new(false);
        let result = ticker.run(&stop, || Err(anyhow!("boom")));
        assert!(result.is_err());
        Ok(())
    }
}
