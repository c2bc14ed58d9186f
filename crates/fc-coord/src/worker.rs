//! Cooperative background loops on OS threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CoordError, Result};

/// What the loop does after one iteration of its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run the body again right away.
    Continue,
    /// Sleep before the next iteration.
    Sleep(Duration),
}

/// Cloneable stop signal shared between a loop and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A named thread that runs `body` until its [`StopFlag`] is raised.
///
/// The flag is checked once per iteration, so stopping takes at most one
/// body run plus one sleep.
#[derive(Debug)]
pub struct BackgroundLoop {
    name: String,
    stop: StopFlag,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundLoop {
    pub fn spawn<F>(name: &str, mut body: F) -> Result<Self>
    where
        F: FnMut() -> Step + Send + 'static,
    {
        let stop = StopFlag::new();
        let flag = stop.clone();
        let thread_name = name.to_owned();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                debug!(worker = %thread_name, "background loop started");
                while !flag.is_stopped() {
                    match body() {
                        Step::Continue => {}
                        Step::Sleep(pause) => thread::sleep(pause),
                    }
                }
                debug!(worker = %thread_name, "background loop stopped");
            })
            .map_err(CoordError::Spawn)?;
        Ok(Self {
            name: name.to_owned(),
            stop,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Raise the stop flag and wait for the thread. `false` if it panicked.
    pub fn stop(mut self) -> bool {
        self.shutdown()
    }

    fn shutdown(&mut self) -> bool {
        self.stop.stop();
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(()) => true,
                Err(_) => {
                    warn!(worker = %self.name, "background loop panicked");
                    false
                }
            },
            None => true,
        }
    }
}

impl Drop for BackgroundLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
