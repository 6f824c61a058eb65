//! Agent duty-cycle hosting with pluggable idle strategies

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crate::error::{Result, TernError};

/// Handler invoked with every error an agent or poll path surfaces
pub type ErrorHandler = dyn Fn(&TernError) + Send + Sync;

/// A unit of cooperative work hosted by an [`AgentRunner`].
pub trait Agent: Send {
    /// One pass of the duty cycle; returns the amount of work done so
    /// the idle strategy can back off on zero
    fn do_work(&mut self) -> Result<usize>;

    /// Invoked exactly once after the duty cycle stops
    fn on_close(&mut self) {}

    fn role_name(&self) -> &str {
        "agent"
    }
}

/// Governs what a duty-cycle thread does when a pass yields no work
pub trait IdleStrategy: Send {
    fn idle(&mut self, work_count: usize);

    fn reset(&mut self) {}
}

impl IdleStrategy for Box<dyn IdleStrategy> {
    fn idle(&mut self, work_count: usize) {
        (**self).idle(work_count);
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}

/// Burn the core, never yield. Lowest latency, one core per agent.
#[derive(Debug, Default)]
pub struct BusySpinIdleStrategy;

impl IdleStrategy for BusySpinIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            std::hint::spin_loop();
        }
    }
}

/// Yield the time slice whenever there is no work
#[derive(Debug, Default)]
pub struct YieldingIdleStrategy;

impl IdleStrategy for YieldingIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            thread::yield_now();
        }
    }
}

/// Sleep for a fixed period whenever there is no work
#[derive(Debug)]
pub struct SleepingIdleStrategy {
    period: Duration,
}

impl SleepingIdleStrategy {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl IdleStrategy for SleepingIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            thread::sleep(self.period);
        }
    }
}

/// Ramp from spinning through yielding to bounded parking
#[derive(Debug)]
pub struct BackoffIdleStrategy {
    max_spins: u64,
    max_yields: u64,
    min_park: Duration,
    max_park: Duration,
    spins: u64,
    yields: u64,
    park_period: Duration,
}

impl BackoffIdleStrategy {
    pub fn new(max_spins: u64, max_yields: u64, min_park: Duration, max_park: Duration) -> Self {
        Self {
            max_spins,
            max_yields,
            min_park,
            max_park,
            spins: 0,
            yields: 0,
            park_period: min_park,
        }
    }
}

impl Default for BackoffIdleStrategy {
    fn default() -> Self {
        Self::new(
            10,
            20,
            Duration::from_micros(1),
            Duration::from_millis(1),
        )
    }
}

impl IdleStrategy for BackoffIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }

        if self.spins < self.max_spins {
            self.spins += 1;
            std::hint::spin_loop();
        } else if self.yields < self.max_yields {
            self.yields += 1;
            thread::yield_now();
        } else {
            thread::sleep(self.park_period);
            self.park_period = std::cmp::min(self.park_period * 2, self.max_park);
        }
    }

    fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
        self.park_period = self.min_park;
    }
}

/// Hosts one agent on a dedicated thread.
///
/// Errors from `do_work` go to the error handler; the agent keeps
/// running unless the error is fatal. `close` stops the duty cycle,
/// joins the thread, and `on_close` runs exactly once.
#[derive(Debug)]
pub struct AgentRunner {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AgentRunner {
    pub fn start<A, I>(mut agent: A, mut idle_strategy: I, error_handler: Arc<ErrorHandler>) -> Self
    where
        A: Agent + 'static,
        I: IdleStrategy + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_flag = Arc::clone(&running);
        let name = agent.role_name().to_string();

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                tracing::debug!(agent = %name, "agent duty cycle starting");

                while running_flag.load(Ordering::Acquire) {
                    match agent.do_work() {
                        Ok(work_count) => idle_strategy.idle(work_count),
                        Err(e) => {
                            error_handler(&e);
                            if e.is_fatal() {
                                tracing::error!(agent = %name, error = %e, "agent terminated by fatal error");
                                break;
                            }
                            idle_strategy.idle(0);
                        }
                    }
                }

                agent.on_close();
                tracing::debug!(agent = %name, "agent duty cycle stopped");
            })
            .expect("failed to spawn agent thread");

        Self {
            running,
            thread: Some(thread),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop the duty cycle and join the thread. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.close();
    }
}
