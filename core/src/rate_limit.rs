// Sliding-window rate limiter
//
// One timestamp list per client, pruned to the trailing minute whenever that
// client makes a request. Clients that stop sending keep their last window
// until they return; nothing sweeps them.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::warn;

use crate::clock::Clock;
use crate::config::SharedConfig;
use crate::{Result, RunnerError};

/// Seconds a rejected client is told to wait
pub const RETRY_AFTER_SECS: u64 = 60;

const WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// `remaining` is `None` when limiting is disabled
    Allowed { remaining: Option<u32> },
    Rejected { retry_after_secs: u64 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }

    /// Remaining budget on admission, `RunnerError::RateLimited` otherwise
    pub fn into_result(self) -> Result<Option<u32>> {
        match self {
            Admission::Allowed { remaining } => Ok(remaining),
            Admission::Rejected { retry_after_secs } => {
                Err(RunnerError::RateLimited { retry_after_secs })
            }
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<DateTime<Utc>>>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: SharedConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            config,
            clock,
        }
    }

    pub async fn admit(&self, client_id: &str) -> Admission {
        let (enabled, limit) = {
            let config = self.config.read().await;
            (config.rate_limit_enabled, config.rate_limit_per_minute)
        };
        if !enabled {
            return Admission::Allowed { remaining: None };
        }

        let now = self.clock.now();
        let window = Duration::seconds(WINDOW_SECS);

        // the entry guard makes prune-check-append atomic per client
        let mut stamps = self.windows.entry(client_id.to_string()).or_default();
        while let Some(oldest) = stamps.front() {
            if now.signed_duration_since(*oldest) < window {
                break;
            }
            stamps.pop_front();
        }

        let used = u32::try_from(stamps.len()).unwrap_or(u32::MAX);
        if used >= limit {
            drop(stamps);
            warn!(target: "rate_limit", client = %client_id, limit = limit, "Rate limit exceeded");
            return Admission::Rejected {
                retry_after_secs: RETRY_AFTER_SECS,
            };
        }

        stamps.push_back(now);
        Admission::Allowed {
            remaining: Some(limit - used - 1),
        }
    }

    /// Clients with a window on record
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Pick the caller identity: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the socket peer, else `"unknown"`.
pub fn resolve_client_id(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<IpAddr>,
) -> String {
    if let Some(first) = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    if let Some(ip) = real_ip.map(str::trim).filter(|v| !v.is_empty()) {
        return ip.to_string();
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_wins() {
        let peer: IpAddr = "10.0.0.9".parse().unwrap();
        assert_eq!(
            resolve_client_id(Some(" 203.0.113.7 , 10.0.0.1"), Some("198.51.100.2"), Some(peer)),
            "203.0.113.7"
        );
    }

    #[test]
    fn test_fallback_order() {
        let peer: IpAddr = "10.0.0.9".parse().unwrap();
        assert_eq!(resolve_client_id(None, Some("198.51.100.2"), Some(peer)), "198.51.100.2");
        assert_eq!(resolve_client_id(Some(""), None, Some(peer)), "10.0.0.9");
        assert_eq!(resolve_client_id(None, None, None), "unknown");
    }

    #[test]
    fn test_rejection_converts_to_rate_limited_error() {
        let err = Admission::Rejected {
            retry_after_secs: RETRY_AFTER_SECS,
        }
        .into_result()
        .unwrap_err();
        assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
        assert!(matches!(err, RunnerError::RateLimited { retry_after_secs: 60 }));

        let allowed = Admission::Allowed { remaining: Some(3) }.into_result();
        assert_eq!(allowed.unwrap(), Some(3));
    }
}
