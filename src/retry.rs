use crate::channel::{Policy, PolicyChannel, PolicyRequest};
use crate::config::MAX_FETCH_ATTEMPTS;
use crate::document::{DocumentHost, ReadyState};
use crate::error::Result;

/// A policy and the number of attempts it took to obtain it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPolicy {
    pub policy: Policy,
    pub attempts: usize,
}

/// Bounded synchronous retry around [`PolicyChannel::fetch`].
///
/// Only a missing endpoint is retried, and only while the document has not
/// finished loading: once every page script has run a late policy protects
/// nothing. There is no delay between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    max_attempts: usize,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(MAX_FETCH_ATTEMPTS)
    }
}

impl RetryController {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_FETCH_ATTEMPTS),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Fetch the policy, reporting every failure to the diagnostic log and
    /// returning the one that ended the loop.
    pub fn fetch(
        &self,
        channel: &dyn PolicyChannel,
        request: &PolicyRequest,
        host: &dyn DocumentHost,
    ) -> Result<FetchedPolicy> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match channel.fetch(request) {
                Ok(policy) => {
                    tracing::debug!(
                        "Fetched policy for {} on attempt {}, readyState {}",
                        request.url,
                        attempt,
                        host.ready_state()
                    );
                    return Ok(FetchedPolicy {
                        policy,
                        attempts: attempt,
                    });
                }
                Err(e) if !e.is_endpoint_missing() => {
                    tracing::error!("Policy fetch for {} failed: {}", request.url, e);
                    return Err(e);
                }
                Err(e) if host.ready_state() == ReadyState::Complete => {
                    tracing::error!(
                        "Policy endpoint missing and {} already loaded, giving up: {}",
                        request.url,
                        e
                    );
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    tracing::error!(
                        "Policy endpoint still missing after {} attempts: {}",
                        attempt,
                        e
                    );
                    return Err(e);
                }
                Err(_) => {
                    tracing::error!("Background page not ready yet, retrying to fetch policy...");
                }
            }
        }
    }
}
