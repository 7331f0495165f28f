//! Performance benchmarks for the hot paths of the presence subsystem

use host::heartbeat::HeartbeatMonitor;
use host::meeting::Tally;
use host::registry::PresenceRegistry;
use shared::protocol::{BallotTarget, Snapshot};
use shared::{Identity, Message, StateUpdate};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

fn identity(n: u16) -> Identity {
    Identity::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 40000 + n))
}

fn populated_registry(participants: u16) -> PresenceRegistry {
    let registry = PresenceRegistry::new();
    for n in 0..participants {
        registry.announce(identity(n), &format!("player-{}", n));
        registry.update_self_position(identity(n), StateUpdate::at(n as f32, n as f32 * 2.0));
    }
    registry
}

/// Benchmarks the per-update registry write
#[test]
fn benchmark_registry_update() {
    let registry = populated_registry(10);

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let update = StateUpdate::at(i as f32, 0.0);
        let _ = registry.update_self_position(identity((i % 10) as u16), update);
    }

    let duration = start.elapsed();
    println!(
        "Registry update: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(registry.len(), 10);
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks building the snapshot reply for a full lobby
#[test]
fn benchmark_snapshot_build() {
    let registry = populated_registry(15);
    let host = identity(0);

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let snapshot = registry.snapshot(host);
        assert_eq!(snapshot.participants.len(), 15);
    }

    let duration = start.elapsed();
    println!(
        "Snapshot build: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks encoding and decoding snapshot frames
#[test]
fn benchmark_snapshot_codec() {
    let registry = populated_registry(15);
    let message = Message::Snapshot(registry.snapshot(identity(0)));
    let frame = message.to_bytes();
    println!("Snapshot frame for 15 participants: {} bytes", frame.len());
    assert!(frame.len() < shared::MAX_FRAME_SIZE);

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = message.to_bytes();
        match Message::decode(&bytes) {
            Ok(Message::Snapshot(Snapshot { participants, .. })) => {
                assert_eq!(participants.len(), 15)
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    let duration = start.elapsed();
    println!(
        "Snapshot codec: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks the heartbeat check over many tracked identities
#[test]
fn benchmark_heartbeat_tick() {
    let monitor = HeartbeatMonitor::new(u32::MAX);
    for n in 0..1000 {
        monitor.touch(identity(n));
    }

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        assert!(monitor.tick().is_empty());
    }

    let duration = start.elapsed();
    println!(
        "Heartbeat tick (1000 identities): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks tallying a meeting
#[test]
fn benchmark_tally() {
    let targets: Vec<BallotTarget> = (0..15)
        .map(|n| match n % 4 {
            0 => BallotTarget::Skip,
            k => BallotTarget::Participant(identity(k as u16)),
        })
        .collect();

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let tally = Tally::from_targets(&targets);
        let _ = tally.verdict();
    }

    let duration = start.elapsed();
    println!(
        "Tally: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks concurrent writers against one registry
#[test]
fn benchmark_concurrent_registry_writers() {
    let registry = Arc::new(populated_registry(8));

    let writes_per_thread = 20_000;
    let start = Instant::now();

    let handles: Vec<_> = (0..8u16)
        .map(|n| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..writes_per_thread {
                    registry.update_self_position(identity(n), StateUpdate::at(i as f32, 0.0));
                    let _ = registry.snapshot_all();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Concurrent registry: 8 threads x {} writes in {:?}",
        writes_per_thread, duration
    );

    assert_eq!(registry.len(), 8);
    assert!(duration.as_secs() < 10);
}
