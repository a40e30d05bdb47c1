//! Process-wide requests-per-minute limiter.
//!
//! One `RpmController` is shared by every executor in a run. `acquire` is
//! the loop's only suspension point: when the window is exhausted it parks
//! the caller until the next minute starts instead of failing. A background
//! task resets the window counter every 60 seconds for as long as any
//! handle to the controller is alive.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

const WINDOW: Duration = Duration::from_secs(60);

/// Caps planner/tool actions per minute across all agents sharing the handle.
pub struct RpmController {
    max_rpm: Option<u32>,
    current: Mutex<u32>,
    reset_task: Mutex<Option<JoinHandle<()>>>,
}

impl RpmController {
    /// Create a shared controller. With no cap configured the controller is
    /// a no-op and no reset task is spawned.
    pub fn new(max_rpm: Option<u32>) -> Arc<Self> {
        let controller = Arc::new(Self {
            max_rpm,
            current: Mutex::new(0),
            reset_task: Mutex::new(None),
        });

        if max_rpm.is_some() {
            // Holding only a Weak here lets the task die with its controller.
            let weak = Arc::downgrade(&controller);
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(WINDOW);
                ticker.tick().await; // first tick completes immediately
                loop {
                    ticker.tick().await;
                    match weak.upgrade() {
                        Some(controller) => {
                            // The periodic path starts a window at zero; the
                            // forced-wait path in `acquire` starts it at one.
                            *controller.current.lock().expect("rpm mutex poisoned") = 0;
                            debug!("rpm window reset");
                        }
                        None => break,
                    }
                }
            });
            *controller.reset_task.lock().expect("rpm mutex poisoned") = Some(handle);
        }

        controller
    }

    /// Take one permit, suspending until the next minute starts if the
    /// window is exhausted. Never fails: waiting is backpressure, not an
    /// error.
    pub async fn acquire(&self) {
        let Some(max_rpm) = self.max_rpm else { return };

        {
            let mut current = self.current.lock().expect("rpm mutex poisoned");
            if *current < max_rpm {
                *current += 1;
                return;
            }
        }

        info!("max rpm reached, waiting for the next minute to start");
        tokio::time::sleep(WINDOW).await;
        // The caller that waited out the window consumes the new window's
        // first permit, so it is not under-counted.
        *self.current.lock().expect("rpm mutex poisoned") = 1;
    }

    /// Cancel the periodic reset task. Idempotent; safe without a cap.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .reset_task
            .lock()
            .expect("rpm mutex poisoned")
            .take()
        {
            handle.abort();
        }
    }
}
