//! The caller side of the suspend and resume contract.
//!
//! A [`ResourceHandle::read`](crate::caching::ResourceHandle::read) never blocks. Instead, a
//! pending entry hands out a [`Suspension`], and it is up to the caller to wait for it and try
//! again. [`SuspenseBoundary`] implements that retry loop around a render function, showing a
//! fallback while anything inside is still loading.

use std::fmt;
use std::sync::Arc;

use crate::caching::{CacheError, Suspension};

/// Why a render attempt could not complete.
#[derive(Debug)]
pub enum Interrupt {
    /// Some resource is still being produced. Render again once this resolves.
    Suspended(Suspension),
    /// Some resource failed to be produced.
    Failed(Arc<CacheError>),
}

impl From<Suspension> for Interrupt {
    fn from(suspension: Suspension) -> Self {
        Interrupt::Suspended(suspension)
    }
}

/// Retries a render function until none of the resources it reads are pending.
pub struct SuspenseBoundary<F> {
    fallback: F,
    attempts: usize,
    suspensions: usize,
}

impl<F> fmt::Debug for SuspenseBoundary<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspenseBoundary")
            .field("attempts", &self.attempts)
            .field("suspensions", &self.suspensions)
            .finish()
    }
}

impl<F: FnMut()> SuspenseBoundary<F> {
    /// Creates a boundary that calls `fallback` whenever a render pass suspends.
    pub fn new(fallback: F) -> Self {
        SuspenseBoundary {
            fallback,
            attempts: 0,
            suspensions: 0,
        }
    }

    /// The total number of times a render function was called.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// The total number of times a render function was interrupted by a pending resource.
    pub fn suspensions(&self) -> usize {
        self.suspensions
    }

    /// Renders until `render` either completes or fails.
    ///
    /// The fallback is shown at most once per call, on the first suspension. Each suspension is
    /// awaited before `render` is called again, so this never spins on a pending resource.
    pub async fn render<T, R>(&mut self, mut render: R) -> Result<T, Arc<CacheError>>
    where
        R: FnMut() -> Result<T, Interrupt>,
    {
        let mut showing_fallback = false;
        loop {
            self.attempts += 1;
            match render() {
                Ok(rendered) => return Ok(rendered),
                Err(Interrupt::Failed(err)) => return Err(err),
                Err(Interrupt::Suspended(suspension)) => {
                    self.suspensions += 1;
                    metric!(counter("caches.suspended") += 1);
                    if !showing_fallback {
                        showing_fallback = true;
                        (self.fallback)();
                    }
                    suspension.await;
                }
            }
        }
    }
}
