//! Reorder impairment tests.
//!
//! Verifies the observed reordering at the receiving socket:
//! - Exact swap count for a fixed interval
//! - Rate stays within a factor of two of the target
//! - No loss with long delays
//! - Jitter alone never reorders
//! - Idle release of a held packet

use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::time::timeout;

use udp_impair::capture::CaptureTarget;
use udp_impair::impair::DelayDistribution;
use udp_impair::proxy::{ImpairProxy, RunReport};
use udp_impair::{Config, Direction};

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

fn impair_config() -> Config {
    let mut config = Config::default();
    config.proxy.listen = Some("127.0.0.1:0".parse().unwrap());
    config.capture.target = CaptureTarget::File("/dev/null".into());
    config.delay.seed = Some(42);
    config.reorder.idle_timeout = Duration::from_secs(5);
    config
}

/// Count packets that arrive after a packet with a higher sequence number.
fn late_packets(received: &[u32]) -> u64 {
    let mut highest = None;
    let mut late = 0;
    for &seq in received {
        match highest {
            Some(h) if seq < h => late += 1,
            _ => highest = Some(seq),
        }
    }
    late
}

/// Send `count` sequence-numbered packets through a fresh proxy and return
/// the order they arrived in.
async fn relay_sequence(mut config: Config, count: u32) -> (RunReport, Vec<u32>) {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    config.proxy.upstream = Some(server.local_addr().unwrap().into());
    config.proxy.max_packets = u64::from(count);

    let proxy = ImpairProxy::bind(&config).await.unwrap();
    let proxy_addr = proxy.local_addr();

    let send_all = async {
        for seq in 0..count {
            client.send_to(&seq.to_be_bytes(), proxy_addr).await.unwrap();
            if seq % 16 == 15 {
                tokio::task::yield_now().await;
            }
        }
    };

    let recv_all = async {
        let mut buf = [0u8; 16];
        let mut received = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (len, _) = timeout(RECV_TIMEOUT, server.recv_from(&mut buf))
                .await
                .expect("timed out waiting for relayed packet")
                .unwrap();
            assert_eq!(len, 4);
            received.push(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]));
        }
        received
    };

    let (report, (), received) =
        tokio::join!(proxy.run(std::future::pending::<()>()), send_all, recv_all);
    (report.unwrap(), received)
}

#[tokio::test]
async fn test_exact_swap_count() {
    let mut config = impair_config();
    config.reorder.rate = 0.1;

    let (report, received) = relay_sequence(config, 500).await;

    let mut sorted = received.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..500).collect::<Vec<_>>(), "no loss or duplication");

    let stats = report.reorder[Direction::ClientToServer];
    assert_eq!(stats.total, 500);
    assert_eq!(stats.reordered, 50);
    assert_eq!(late_packets(&received), stats.reordered);
}

#[tokio::test]
async fn test_observed_rate_near_target() {
    let mut config = impair_config();
    config.delay.base_ms = 5.0;
    config.delay.jitter_ms = 2.0;
    config.delay.expected_packets = 1000;
    config.reorder.rate = 0.02;

    let (report, received) = relay_sequence(config, 1000).await;

    let observed = late_packets(&received) as f64 / 1000.0;
    assert!(
        (0.01..=0.04).contains(&observed),
        "observed reorder rate {observed} outside [0.01, 0.04]"
    );
    assert_eq!(report.transmitted, 1000);
}

#[tokio::test]
async fn test_harness_scenario_rate_within_band() {
    let mut config = impair_config();
    config.delay.base_ms = 400.0;
    config.delay.jitter_ms = 100.0;
    config.delay.expected_packets = 2000;
    config.reorder.rate = 0.0006;

    let (report, received) = relay_sequence(config, 2000).await;

    let mut sorted = received.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..2000).collect::<Vec<_>>(), "no packet missing");

    let pct = late_packets(&received) as f64 / 2000.0 * 100.0;
    assert!((0.03..=0.12).contains(&pct), "reorder {pct}% outside [0.03%, 0.12%]");
    assert_eq!(report.reorder[Direction::ClientToServer].reordered, 1);
}

#[tokio::test]
async fn test_jitter_alone_never_reorders() {
    let mut config = impair_config();
    config.delay.base_ms = 10.0;
    config.delay.jitter_ms = 8.0;
    config.delay.distribution = DelayDistribution::Uniform;
    config.delay.expected_packets = 300;

    let (report, received) = relay_sequence(config, 300).await;

    assert_eq!(late_packets(&received), 0);
    assert_eq!(received, (0..300).collect::<Vec<_>>());
    assert_eq!(report.reorder[Direction::ClientToServer].reordered, 0);
}

#[tokio::test]
async fn test_idle_release_of_held_packet() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut config = impair_config();
    config.proxy.upstream = Some(server.local_addr().unwrap().into());
    config.reorder.rate = 0.5;
    config.reorder.idle_timeout = Duration::from_millis(50);
    config.proxy.max_packets = 0;

    let proxy = ImpairProxy::bind(&config).await.unwrap();
    let proxy_addr = proxy.local_addr();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let traffic = async {
        let started = Instant::now();
        client.send_to(b"held", proxy_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = timeout(RECV_TIMEOUT, server.recv_from(&mut buf))
            .await
            .expect("held packet was never released")
            .unwrap();
        let elapsed = started.elapsed();
        stop_tx.send(()).unwrap();
        (&buf[..len] == b"held", elapsed)
    };

    let shutdown = async {
        let _ = stop_rx.await;
    };
    let (report, (payload_ok, elapsed)) = tokio::join!(proxy.run(shutdown), traffic);
    let report = report.unwrap();

    assert!(payload_ok);
    assert!(elapsed >= Duration::from_millis(45), "released after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "released after {elapsed:?}");
    assert_eq!(report.transmitted, 1);
    assert_eq!(report.reorder[Direction::ClientToServer].reordered, 0);
}
