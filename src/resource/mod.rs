//! Admission control for parallel work.
//!
//! Four budget dimensions: tokens per sliding minute, instantaneous
//! memory, instantaneous CPU, and live concurrent agents. A request is
//! admitted only when adding it keeps every dimension at or under its
//! limit. `try_acquire` never blocks; waiting (and giving up) is the
//! caller's business. Waiters queue FIFO on the single admission lock.
//!
//! A background sampler records actual memory and CPU once per second
//! into a bounded history, which `optimal_concurrency` uses to clamp
//! the advertised parallelism under observed pressure.

use crate::config::ResourceLimits;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Sliding window length for the token dimension
const TOKEN_WINDOW: Duration = Duration::from_secs(60);

/// Sampler cadence
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded sample history length (five minutes at 1 Hz)
const HISTORY_LIMIT: usize = 300;

/// One admission request across all four dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceRequest {
    pub tokens: u64,
    pub memory_mb: u64,
    pub cpu_pct: f64,
    pub agents: u32,
}

impl ResourceRequest {
    /// Conventional request for a group of `agents` workers.
    pub fn for_agents(agents: u32, tokens_per_agent: u64) -> Self {
        Self {
            tokens: tokens_per_agent * agents as u64,
            memory_mb: 256 * agents as u64,
            cpu_pct: 10.0 * agents as f64,
            agents,
        }
    }
}

/// One observation from the background sampler.
#[derive(Debug, Clone)]
pub struct SystemSample {
    pub at: DateTime<Utc>,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub cpu_pct: f32,
}

/// Point-in-time view of the manager's bookkeeping.
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    pub limits: ResourceLimits,
    pub allocated_memory_mb: u64,
    pub allocated_cpu_pct: f64,
    pub live_agents: u32,
    pub tokens_last_minute: u64,
    pub latest_sample: Option<SystemSample>,
}

#[derive(Debug, Default)]
struct Ledger {
    allocations: HashMap<String, ResourceRequest>,
    token_window: VecDeque<(Instant, u64)>,
}

impl Ledger {
    fn prune_tokens(&mut self, now: Instant) {
        while let Some((at, _)) = self.token_window.front() {
            if now.duration_since(*at) > TOKEN_WINDOW {
                self.token_window.pop_front();
            } else {
                break;
            }
        }
    }

    fn tokens_in_window(&self) -> u64 {
        self.token_window.iter().map(|(_, t)| *t).sum()
    }

    fn allocated_memory_mb(&self) -> u64 {
        self.allocations.values().map(|a| a.memory_mb).sum()
    }

    fn allocated_cpu_pct(&self) -> f64 {
        self.allocations.values().map(|a| a.cpu_pct).sum()
    }

    fn live_agents(&self) -> u32 {
        self.allocations.values().map(|a| a.agents).sum()
    }
}

/// Process-local resource manager; one per orchestrator context.
#[derive(Debug)]
pub struct ResourceManager {
    limits: ResourceLimits,
    ledger: Mutex<Ledger>,
    history: Mutex<VecDeque<SystemSample>>,
}

impl ResourceManager {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            ledger: Mutex::new(Ledger::default()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Try to admit `request` under `key`. Non-blocking; returns whether
    /// the allocation was recorded. A key that is already admitted is
    /// refused until released.
    pub async fn try_acquire(&self, key: &str, request: ResourceRequest) -> bool {
        let mut ledger = self.ledger.lock().await;
        if ledger.allocations.contains_key(key) {
            return false;
        }

        ledger.prune_tokens(Instant::now());

        let admitted = ledger.tokens_in_window() + request.tokens <= self.limits.tokens_per_min
            && ledger.allocated_memory_mb() + request.memory_mb <= self.limits.memory_mb
            && ledger.allocated_cpu_pct() + request.cpu_pct <= self.limits.cpu_pct
            && ledger.live_agents() + request.agents <= self.limits.concurrent_agents;

        if admitted {
            if request.tokens > 0 {
                ledger.token_window.push_back((Instant::now(), request.tokens));
            }
            debug!(key, ?request, "resource allocation admitted");
            ledger.allocations.insert(key.to_string(), request);
        } else {
            debug!(key, ?request, "resource allocation denied");
        }
        admitted
    }

    /// Release the allocation held under `key`, if any.
    ///
    /// Tokens are not returned; they were spent into the sliding window.
    pub async fn release(&self, key: &str) {
        let mut ledger = self.ledger.lock().await;
        if ledger.allocations.remove(key).is_some() {
            debug!(key, "resource allocation released");
        }
    }

    /// Record actually consumed tokens into the sliding window.
    pub async fn record_tokens(&self, tokens: u64) {
        if tokens == 0 {
            return;
        }
        let mut ledger = self.ledger.lock().await;
        ledger.token_window.push_back((Instant::now(), tokens));
    }

    /// How many agents the caller should run side by side right now:
    /// the free share of the agent budget, clamped down when the latest
    /// sample shows the host near its memory or CPU limit.
    pub async fn optimal_concurrency(&self) -> usize {
        let free_agents = {
            let ledger = self.ledger.lock().await;
            self.limits
                .concurrent_agents
                .saturating_sub(ledger.live_agents())
        };

        let mut allowance = free_agents.max(1) as usize;

        if let Some(sample) = self.latest_sample().await {
            let memory_pressure =
                sample.memory_used_mb as f64 >= self.limits.memory_mb as f64 * 0.9;
            let cpu_pressure = sample.cpu_pct as f64 >= self.limits.cpu_pct;
            if memory_pressure || cpu_pressure {
                allowance = (allowance / 2).max(1);
            }
        }
        allowance
    }

    /// Current bookkeeping across all dimensions.
    pub async fn snapshot(&self) -> ResourceSnapshot {
        let mut ledger = self.ledger.lock().await;
        ledger.prune_tokens(Instant::now());
        let latest_sample = self.latest_sample().await;

        ResourceSnapshot {
            limits: self.limits.clone(),
            allocated_memory_mb: ledger.allocated_memory_mb(),
            allocated_cpu_pct: ledger.allocated_cpu_pct(),
            live_agents: ledger.live_agents(),
            tokens_last_minute: ledger.tokens_in_window(),
            latest_sample,
        }
    }

    async fn latest_sample(&self) -> Option<SystemSample> {
        self.history.lock().await.back().cloned()
    }

    /// Start the 1 Hz sampler. The returned handle owns the loop; abort
    /// it on shutdown.
    pub fn start_sampler(self: Arc<Self>) -> JoinHandle<()> {
        let manager = self;
        tokio::spawn(async move {
            let mut sys = System::new();
            loop {
                sys.refresh_memory();
                sys.refresh_cpu_usage();

                let sample = SystemSample {
                    at: Utc::now(),
                    memory_used_mb: sys.used_memory() / (1024 * 1024),
                    memory_total_mb: sys.total_memory() / (1024 * 1024),
                    cpu_pct: sys.global_cpu_usage(),
                };

                {
                    let mut history = manager.history.lock().await;
                    history.push_back(sample);
                    while history.len() > HISTORY_LIMIT {
                        history.pop_front();
                    }
                }

                tokio::time::sleep(SAMPLE_INTERVAL).await;
            }
        })
    }

    #[cfg(test)]
    async fn push_sample(&self, sample: SystemSample) {
        self.history.lock().await.push_back(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            tokens_per_min: 1000,
            memory_mb: 1024,
            cpu_pct: 50.0,
            concurrent_agents: 4,
        }
    }

    #[tokio::test]
    async fn test_admission_respects_every_dimension() {
        let manager = ResourceManager::new(limits());

        assert!(
            manager
                .try_acquire("g1", ResourceRequest {
                    tokens: 600,
                    memory_mb: 512,
                    cpu_pct: 20.0,
                    agents: 2,
                })
                .await
        );

        // Tokens would exceed the window.
        assert!(
            !manager
                .try_acquire("g2", ResourceRequest {
                    tokens: 600,
                    memory_mb: 1,
                    cpu_pct: 1.0,
                    agents: 1,
                })
                .await
        );

        // Memory would exceed.
        assert!(
            !manager
                .try_acquire("g3", ResourceRequest {
                    tokens: 0,
                    memory_mb: 600,
                    cpu_pct: 1.0,
                    agents: 1,
                })
                .await
        );

        // Fits in everything.
        assert!(
            manager
                .try_acquire("g4", ResourceRequest {
                    tokens: 100,
                    memory_mb: 256,
                    cpu_pct: 10.0,
                    agents: 2,
                })
                .await
        );

        // Agent budget now exhausted.
        assert!(
            !manager
                .try_acquire("g5", ResourceRequest {
                    tokens: 0,
                    memory_mb: 1,
                    cpu_pct: 1.0,
                    agents: 1,
                })
                .await
        );
    }

    #[tokio::test]
    async fn test_release_frees_instantaneous_dimensions() {
        let manager = ResourceManager::new(limits());
        let request = ResourceRequest {
            tokens: 0,
            memory_mb: 1024,
            cpu_pct: 50.0,
            agents: 4,
        };

        assert!(manager.try_acquire("g1", request.clone()).await);
        assert!(!manager.try_acquire("g2", request.clone()).await);

        manager.release("g1").await;
        assert!(manager.try_acquire("g2", request).await);
    }

    #[tokio::test]
    async fn test_duplicate_key_refused() {
        let manager = ResourceManager::new(limits());
        let request = ResourceRequest::for_agents(1, 10);

        assert!(manager.try_acquire("g1", request.clone()).await);
        assert!(!manager.try_acquire("g1", request).await);
    }

    #[tokio::test]
    async fn test_snapshot_sums_allocations() {
        let manager = ResourceManager::new(limits());
        manager
            .try_acquire("g1", ResourceRequest {
                tokens: 100,
                memory_mb: 200,
                cpu_pct: 10.0,
                agents: 1,
            })
            .await;
        manager
            .try_acquire("g2", ResourceRequest {
                tokens: 50,
                memory_mb: 100,
                cpu_pct: 5.0,
                agents: 2,
            })
            .await;

        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.allocated_memory_mb, 300);
        assert_eq!(snapshot.allocated_cpu_pct, 15.0);
        assert_eq!(snapshot.live_agents, 3);
        assert_eq!(snapshot.tokens_last_minute, 150);
    }

    #[tokio::test]
    async fn test_optimal_concurrency_clamps_under_pressure() {
        let manager = ResourceManager::new(limits());
        assert_eq!(manager.optimal_concurrency().await, 4);

        manager
            .try_acquire("g1", ResourceRequest::for_agents(2, 0))
            .await;
        assert_eq!(manager.optimal_concurrency().await, 2);

        manager
            .push_sample(SystemSample {
                at: Utc::now(),
                memory_used_mb: 1020,
                memory_total_mb: 2048,
                cpu_pct: 10.0,
            })
            .await;
        assert_eq!(manager.optimal_concurrency().await, 1);
    }
}
