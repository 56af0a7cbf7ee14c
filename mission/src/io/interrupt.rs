//! Operator interrupt (Ctrl-C) routed into a shared flag.
//!
//! Once the handler is installed, SIGINT no longer terminates the supervisor.
//! The agent runner polls the flag, stops its child, and the orchestrator
//! records the attempt as interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Install a process-wide Ctrl-C listener that sets this flag.
    pub fn install_ctrl_c(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build signal runtime")?;
        let flag = self.clone();
        thread::Builder::new()
            .name("ctrl-c".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        if let Err(err) = tokio::signal::ctrl_c().await {
                            warn!(err = %err, "ctrl-c listener stopped");
                            break;
                        }
                        debug!("interrupt received");
                        flag.trigger();
                    }
                });
            })
            .context("spawn ctrl-c listener")?;
        Ok(())
    }
}
