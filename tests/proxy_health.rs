// tests/proxy_health.rs
use async_trait::async_trait;
use fireproof_leads::config::ProxySection;
use fireproof_leads::proxy::{ProbeClient, ProxyChecker, ProxyClass};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Plain probes answer per the script; secure probes hang or answer.
struct FakeProbe {
    plain_status: Result<u16, String>,
    secure_hangs: bool,
}

#[async_trait]
impl ProbeClient for FakeProbe {
    async fn probe(&self, _proxy: &str, url: &str, _timeout: Duration) -> Result<u16, String> {
        if url.starts_with("https://") {
            if self.secure_hangs {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            return Ok(200);
        }
        self.plain_status.clone()
    }
}

fn checker(probe: FakeProbe) -> ProxyChecker {
    ProxyChecker::new(Arc::new(probe), &ProxySection::default())
}

#[tokio::test(start_paused = true)]
async fn plain_ok_secure_timeout_is_degraded() {
    let c = checker(FakeProbe {
        plain_status: Ok(200),
        secure_hangs: true,
    });
    let h = c.test("10.0.0.1:8080").await;
    assert_eq!(h.address, "http://10.0.0.1:8080");
    assert!(h.plain.ok);
    assert!(!h.secure.ok);
    assert!(h.secure.error.as_deref().unwrap_or_default().contains("timed out"));
    assert_eq!(h.class, ProxyClass::Degraded);
}

#[tokio::test]
async fn both_probes_ok_is_healthy_and_errors_are_dead() {
    let healthy = checker(FakeProbe {
        plain_status: Ok(200),
        secure_hangs: false,
    })
    .test("http://10.0.0.2:3128")
    .await;
    assert_eq!(healthy.class, ProxyClass::Healthy);

    let non_200 = checker(FakeProbe {
        plain_status: Ok(407),
        secure_hangs: false,
    })
    .test("10.0.0.3:80")
    .await;
    assert_eq!(non_200.class, ProxyClass::Degraded);
    assert_eq!(non_200.plain.error.as_deref(), Some("HTTP 407"));
}

#[tokio::test(start_paused = true)]
async fn dead_when_nothing_answers_and_batches_keep_order() {
    let c = checker(FakeProbe {
        plain_status: Err("connection refused".into()),
        secure_hangs: true,
    });
    let candidates: Vec<String> = (1..=5).map(|i| format!("10.0.1.{i}:8080")).collect();
    let results = c.test_all(&candidates, 3).await;
    assert_eq!(results.len(), 3);
    let addrs: Vec<_> = results.iter().map(|h| h.address.as_str()).collect();
    assert_eq!(
        addrs,
        vec!["http://10.0.1.1:8080", "http://10.0.1.2:8080", "http://10.0.1.3:8080"]
    );
    assert!(results.iter().all(|h| h.class == ProxyClass::Dead));
}

/// Counts probes in flight and remembers the peak.
#[derive(Default)]
struct CountingProbe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ProbeClient for CountingProbe {
    async fn probe(&self, _proxy: &str, _url: &str, _timeout: Duration) -> Result<u16, String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(200)
    }
}

#[tokio::test(start_paused = true)]
async fn batch_probes_are_bounded_by_config() {
    let probe = Arc::new(CountingProbe::default());
    let cfg = ProxySection {
        max_concurrent_probes: 2,
        ..ProxySection::default()
    };
    let c = ProxyChecker::new(probe.clone(), &cfg);
    let candidates: Vec<String> = (1..=6).map(|i| format!("10.0.2.{i}:8080")).collect();

    let results = c.test_all(&candidates, 6).await;
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|h| h.class == ProxyClass::Healthy));
    // Each candidate runs its plain and secure probe together.
    assert_eq!(probe.peak.load(Ordering::SeqCst), 4);
}
