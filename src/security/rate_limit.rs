//! Admission gate: trusted-range bypass in front of a shared fixed-window limit.
//!
//! # Decision order
//! ```text
//! client ip
//!     → in trusted ranges?      → Allow (counter untouched)
//!     → store increment (bounded by store_timeout)
//!         → error / timeout     → Allow (fail-open, degraded metric)
//!         → count > limit       → Deny  (429, deny metric)
//!         → otherwise           → Allow
//! ```
//!
//! Denials are immediate; there is no slow-down phase.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::RateLimitConfig;
use crate::observability::metrics::{DegradedReason, MetricsSink, RecorderSink};
use crate::security::cidr::{parse_client_ip, TrustedRanges};
use crate::store::{CounterStore, StoreError, StoreResult, WindowCount};

/// Body of every 429 response.
pub const DENY_MESSAGE: &str = "Too many requests, please try again later.";

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

/// How a verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Source address is in a trusted range; not counted.
    Trusted,
    /// Counted against the shared window.
    Counted(WindowCount),
    /// Store failed; allowed without a count.
    Degraded(DegradedReason),
}

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub verdict: Verdict,
    pub outcome: Outcome,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

/// Limits applied to untrusted clients.
#[derive(Debug, Clone, Copy)]
pub struct GateLimits {
    pub max_requests: u64,
    pub window: Duration,
    pub store_timeout: Duration,
}

impl From<&RateLimitConfig> for GateLimits {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window(),
            store_timeout: config.store_timeout(),
        }
    }
}

/// Request-time admission decision.
///
/// Shared by every request handler; holds no per-request state.
pub struct AdmissionGate {
    trusted: TrustedRanges,
    store: Arc<dyn CounterStore>,
    limits: GateLimits,
    metrics: Arc<dyn MetricsSink>,
}

impl AdmissionGate {
    pub fn new(trusted: TrustedRanges, store: Arc<dyn CounterStore>, limits: GateLimits) -> Self {
        Self {
            trusted,
            store,
            limits,
            metrics: Arc::new(RecorderSink),
        }
    }

    /// Report decisions to `sink` instead of the global recorder.
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    pub fn limits(&self) -> GateLimits {
        self.limits
    }

    pub fn trusted_ranges(&self) -> &TrustedRanges {
        &self.trusted
    }

    /// Decide whether a request from `client_ip` may proceed.
    pub async fn admit(&self, client_ip: &str) -> Admission {
        if self.trusted.contains(client_ip) {
            self.metrics.trusted_bypass();
            tracing::trace!(client = %client_ip, "Trusted source, skipping rate limit");
            return Admission {
                verdict: Verdict::Allow,
                outcome: Outcome::Trusted,
            };
        }

        if let Err(e) = parse_client_ip(client_ip) {
            // Still counted, keyed by the raw string
            tracing::debug!(error = %e, "Counting unparseable client address");
        }

        match self.increment(client_ip).await {
            Ok(window) if window.exceeded => {
                self.metrics.rate_limited();
                tracing::warn!(
                    client = %client_ip,
                    count = window.count,
                    limit = self.limits.max_requests,
                    "Rate limit exceeded"
                );
                Admission {
                    verdict: Verdict::Deny,
                    outcome: Outcome::Counted(window),
                }
            }
            Ok(window) => Admission {
                verdict: Verdict::Allow,
                outcome: Outcome::Counted(window),
            },
            Err(e) => {
                let reason = match e {
                    StoreError::Timeout(_) => DegradedReason::Timeout,
                    StoreError::Unavailable(_) => DegradedReason::Unavailable,
                };
                self.metrics.limiter_degraded(reason);
                tracing::warn!(client = %client_ip, error = %e, "Counter store failed, allowing request");
                Admission {
                    verdict: Verdict::Allow,
                    outcome: Outcome::Degraded(reason),
                }
            }
        }
    }

    /// Increment on a detached task so the count still lands if the caller
    /// goes away mid-request.
    ///
    /// The task owns the timeout: a hung store call is dropped after
    /// `store_timeout` whether or not anyone is still waiting.
    async fn increment(&self, client_ip: &str) -> StoreResult<WindowCount> {
        let store = Arc::clone(&self.store);
        let key = client_ip.to_string();
        let GateLimits {
            max_requests,
            window,
            store_timeout,
        } = self.limits;

        let call = tokio::spawn(async move {
            tokio::time::timeout(
                store_timeout,
                store.increment_and_check(&key, max_requests, window),
            )
            .await
        });

        match call.await {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(StoreError::Timeout(store_timeout)),
            Err(join_err) => Err(StoreError::Unavailable(join_err.to_string())),
        }
    }
}

/// Text form of the peer address used for matching and as the counter key.
///
/// IPv4-mapped IPv6 peers are reported as plain IPv4.
pub fn client_key(addr: &SocketAddr) -> String {
    match addr.ip() {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}

fn set_limit_headers(headers: &mut HeaderMap, limit: u64, window: &WindowCount) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(window.remaining(limit)));
}

/// Build the 429 response for a denied request.
pub fn deny_response(limits: &GateLimits, window: &WindowCount) -> Response {
    let mut response = (StatusCode::TOO_MANY_REQUESTS, DENY_MESSAGE).into_response();
    let headers = response.headers_mut();
    set_limit_headers(headers, limits.max_requests, window);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(limits.window.as_secs()));
    response
}

/// Middleware installing the gate in front of the request pipeline.
///
/// The client is identified by the direct peer address only; forwarding
/// headers are not trusted.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(gate): State<Arc<AdmissionGate>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&addr);
    let admission = gate.admit(&client).await;

    match (admission.verdict, admission.outcome) {
        (Verdict::Deny, Outcome::Counted(window)) => deny_response(&gate.limits, &window),
        (Verdict::Deny, _) => (StatusCode::TOO_MANY_REQUESTS, DENY_MESSAGE).into_response(),
        (Verdict::Allow, Outcome::Counted(window)) => {
            let mut response = next.run(request).await;
            set_limit_headers(response.headers_mut(), gate.limits.max_requests, &window);
            response
        }
        (Verdict::Allow, _) => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::cidr::CidrBlock;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::net::Ipv6Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        denied: AtomicUsize,
        degraded: AtomicUsize,
        bypassed: AtomicUsize,
    }

    impl MetricsSink for CountingSink {
        fn rate_limited(&self) {
            self.denied.fetch_add(1, Ordering::SeqCst);
        }
        fn limiter_degraded(&self, _reason: DegradedReason) {
            self.degraded.fetch_add(1, Ordering::SeqCst);
        }
        fn trusted_bypass(&self) {
            self.bypassed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Store that never answers in time.
    struct StalledStore;

    #[async_trait]
    impl CounterStore for StalledStore {
        async fn increment_and_check(&self, _: &str, _: u64, _: Duration) -> StoreResult<WindowCount> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(WindowCount::new(1, 1))
        }
        async fn current(&self, _: &str) -> StoreResult<u64> {
            Ok(0)
        }
    }

    /// Store that never answers and tracks how many calls are still pending.
    #[derive(Default)]
    struct HungStore {
        pending: Arc<AtomicUsize>,
    }

    struct PendingGuard(Arc<AtomicUsize>);

    impl Drop for PendingGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CounterStore for HungStore {
        async fn increment_and_check(&self, _: &str, _: u64, _: Duration) -> StoreResult<WindowCount> {
            self.pending.fetch_add(1, Ordering::SeqCst);
            let _guard = PendingGuard(self.pending.clone());
            std::future::pending().await
        }
        async fn current(&self, _: &str) -> StoreResult<u64> {
            Ok(0)
        }
    }

    /// Store that is down.
    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment_and_check(&self, _: &str, _: u64, _: Duration) -> StoreResult<WindowCount> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn current(&self, _: &str) -> StoreResult<u64> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    fn limits(max: u64) -> GateLimits {
        GateLimits {
            max_requests: max,
            window: Duration::from_secs(60),
            store_timeout: Duration::from_millis(50),
        }
    }

    fn github_ranges() -> TrustedRanges {
        TrustedRanges::new(vec!["192.30.252.0/22".parse::<CidrBlock>().unwrap()])
    }

    fn gate(store: Arc<dyn CounterStore>, max: u64) -> (AdmissionGate, Arc<CountingSink>) {
        let sink = Arc::new(CountingSink::default());
        let gate = AdmissionGate::new(github_ranges(), store, limits(max)).with_metrics(sink.clone());
        (gate, sink)
    }

    #[tokio::test]
    async fn test_trusted_bypass_wins_over_exceeded_counter() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..150 {
            store
                .increment_and_check("192.30.252.1", 100, Duration::from_secs(60))
                .await
                .unwrap();
        }
        let (gate, sink) = gate(store.clone(), 100);

        let admission = gate.admit("192.30.252.1").await;
        assert_eq!(admission.verdict, Verdict::Allow);
        assert_eq!(admission.outcome, Outcome::Trusted);
        assert_eq!(sink.bypassed.load(Ordering::SeqCst), 1);
        // Counter untouched by the bypassed request
        assert_eq!(store.current("192.30.252.1").await.unwrap(), 150);
    }

    #[tokio::test]
    async fn test_untrusted_denied_after_limit() {
        let (gate, sink) = gate(Arc::new(MemoryStore::new()), 100);

        for i in 1..=100 {
            let admission = gate.admit("203.0.113.7").await;
            assert!(admission.is_allowed(), "request {i} should be allowed");
        }
        let admission = gate.admit("203.0.113.7").await;
        assert_eq!(admission.verdict, Verdict::Deny);
        assert_eq!(
            admission.outcome,
            Outcome::Counted(WindowCount { count: 101, exceeded: true })
        );
        assert_eq!(sink.denied.load(Ordering::SeqCst), 1);
        assert_eq!(sink.degraded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_timeout_fails_open() {
        let (gate, sink) = gate(Arc::new(StalledStore), 1);

        let admission = gate.admit("203.0.113.7").await;
        assert_eq!(admission.verdict, Verdict::Allow);
        assert_eq!(admission.outcome, Outcome::Degraded(DegradedReason::Timeout));
        assert_eq!(sink.degraded.load(Ordering::SeqCst), 1);
        assert_eq!(sink.denied.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hung_store_calls_do_not_outlive_timeout() {
        let store = Arc::new(HungStore::default());
        let pending = store.pending.clone();
        let (gate, sink) = gate(store, 1);

        for _ in 0..200 {
            let admission = gate.admit("203.0.113.7").await;
            assert_eq!(admission.outcome, Outcome::Degraded(DegradedReason::Timeout));
        }
        assert_eq!(sink.degraded.load(Ordering::SeqCst), 200);
        assert_eq!(pending.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abandoned_admission_is_still_bounded() {
        let store = Arc::new(HungStore::default());
        let pending = store.pending.clone();
        let (gate, _) = gate(store, 1);

        // Caller gives up long before the store timeout
        for _ in 0..50 {
            let abandoned = tokio::time::timeout(Duration::from_millis(1), gate.admit("203.0.113.7")).await;
            assert!(abandoned.is_err());
        }
        assert!(pending.load(Ordering::SeqCst) > 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pending.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_unavailable_fails_open() {
        let (gate, sink) = gate(Arc::new(DownStore), 1);

        for _ in 0..3 {
            let admission = gate.admit("203.0.113.7").await;
            assert_eq!(admission.outcome, Outcome::Degraded(DegradedReason::Unavailable));
            assert!(admission.is_allowed());
        }
        assert_eq!(sink.degraded.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_malformed_address_is_counted_raw() {
        let store = Arc::new(MemoryStore::new());
        let (gate, _) = gate(store.clone(), 1);

        assert!(gate.admit("garbage").await.is_allowed());
        assert_eq!(gate.admit("garbage").await.verdict, Verdict::Deny);
        assert_eq!(store.current("garbage").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_trusted_set_counts_everyone() {
        let store = Arc::new(MemoryStore::new());
        let gate = AdmissionGate::new(TrustedRanges::empty(), store.clone(), limits(10))
            .with_metrics(Arc::new(CountingSink::default()));

        let admission = gate.admit("192.30.252.1").await;
        assert!(matches!(admission.outcome, Outcome::Counted(_)));
        assert_eq!(store.current("192.30.252.1").await.unwrap(), 1);
    }

    #[test]
    fn test_client_key_unmaps_ipv4() {
        let mapped = SocketAddr::new(Ipv6Addr::from([0, 0, 0, 0, 0, 0xffff, 0xc01e, 0xfc01]).into(), 443);
        assert_eq!(client_key(&mapped), "192.30.252.1");

        let v6 = SocketAddr::new(Ipv6Addr::LOCALHOST.into(), 443);
        assert_eq!(client_key(&v6), "::1");

        let v4: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        assert_eq!(client_key(&v4), "10.0.0.1");
    }

    #[test]
    fn test_deny_response() {
        let response = deny_response(&limits(100), &WindowCount::new(101, 100));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers[X_RATELIMIT_LIMIT], "100");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[header::RETRY_AFTER], "60");
    }
}
