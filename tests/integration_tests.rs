use iotivp_core::pipeline::{CORE_PACKET_KEY, VERIFY_ERROR_KEY, VERIFY_RESULT_KEY};
use iotivp_core::replay::ReplaySnapshot;
use iotivp_core::{
    CorePacket, Encoder, FieldSpec, Fields, FixedLayout, Gateway, GatewayConfig, HashAlgorithm,
    Item, LayoutRegistry, MemoryReplayState, PacketLayoutConfig, ReplayStore, VerifyResult,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

const NOW: u64 = 1_732_212_000;
const SECRET: &str = "gateway-shared-secret";

mod statistical_analysis {
    pub struct LatencyStats {
        pub mean: f64,
        pub p50: f64,
        pub p99: f64,
        pub max: f64,
    }

    impl LatencyStats {
        pub fn compute(samples: &[f64]) -> Self {
            let mut sorted = samples.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

            let mean = samples.iter().sum::<f64>() / samples.len() as f64;

            Self {
                mean,
                p50: sorted[samples.len() / 2],
                p99: sorted[samples.len() * 99 / 100],
                max: sorted[sorted.len() - 1],
            }
        }

        pub fn report(&self) -> String {
            format!(
                "LATENCY ANALYSIS:\n  Mean: {:.3}μs\n  P50: {:.3}μs\n  P99: {:.3}μs\n  Max: {:.3}μs",
                self.mean, self.p50, self.p99, self.max
            )
        }
    }
}

fn config() -> GatewayConfig {
    GatewayConfig::builder(SECRET).build().unwrap()
}

fn environment_packet(device_id: u64, nonce: u64, timestamp: u64) -> CorePacket {
    CorePacket::new(1, timestamp, device_id, nonce, Fields::new())
        .with_field("temperature", 25.4)
        .with_field("humidity", 52.0)
        .with_field("battery", 91.0)
}

fn item_with(packet_hex: String) -> Item {
    match json!({ "source": "lora-gw-3", "packet_hex": packet_hex }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn fixture(config: &GatewayConfig) -> (Gateway, Encoder) {
    let gateway = Gateway::from_config(config).unwrap();
    let encoder = Encoder::from_config(config, LayoutRegistry::default()).unwrap();
    (gateway, encoder)
}

fn result_of(item: &Item) -> VerifyResult {
    serde_json::from_value(item[VERIFY_RESULT_KEY].clone()).unwrap()
}

#[test]
fn test_output_item_shape() {
    let (gateway, encoder) = fixture(&config());
    let hex = encoder.encode_hex(&environment_packet(42, 7, NOW)).unwrap();

    let outcome = gateway.process_batch_at(vec![item_with(hex)], NOW);
    assert_eq!(outcome.items.len(), 1);

    let item = &outcome.items[0];
    assert_eq!(item["source"], "lora-gw-3");
    assert!(item.contains_key("packet_hex"));
    assert!(!item.contains_key(VERIFY_ERROR_KEY));

    let core = &item[CORE_PACKET_KEY];
    assert_eq!(core["header"], 1);
    assert_eq!(core["device_id"], 42);
    assert_eq!(core["nonce"], 7);
    assert_eq!(core["timestamp"], NOW & 0xffff);
    assert_eq!(core["fields"]["temperature"], 25.4);
    assert_eq!(core["hash"].as_str().unwrap().len(), 8);

    let result = result_of(item);
    assert!(result.valid);
    assert_eq!(result.integrity_score, 100);

    println!("✓ Output item: passthrough fields kept, core_packet and verify_result attached");
}

#[test]
fn test_verification_determinism() {
    let config = config();
    let encoder = Encoder::from_config(&config, LayoutRegistry::default()).unwrap();
    let hex = encoder.encode_hex(&environment_packet(5, 9, NOW - 10)).unwrap();

    let mut results = Vec::new();
    for _ in 0..50 {
        // Fresh replay state per run: no intervening mutation
        let gateway = Gateway::from_config(&config).unwrap();
        results.push(gateway.inspect_at(&hex, NOW).unwrap());
    }

    let first = &results[0];
    for (idx, verified) in results.iter().enumerate() {
        assert_eq!(first, verified, "Verification {} differs from first", idx);
    }

    println!("✓ Determinism verified: 50/50 verdicts identical");
}

#[test]
fn test_single_bit_flip_breaks_hash() {
    for alg in [HashAlgorithm::Blake2s, HashAlgorithm::Sha256] {
        let config = GatewayConfig::builder(SECRET).with_hash_alg(alg).build().unwrap();
        let encoder = Encoder::from_config(&config, LayoutRegistry::default()).unwrap();
        let raw = encoder.encode(&environment_packet(42, 7, NOW)).unwrap();
        let signed_len = raw.len() - config.hash_len;

        let mut flips = 0;
        for byte in 0..signed_len {
            for bit in 0..8 {
                let mut tampered = raw.clone();
                tampered[byte] ^= 1 << bit;

                // Header flips may select another layout; skip undecodable ones
                let gateway = Gateway::from_config(&config).unwrap();
                if let Ok(verified) = gateway.inspect_bytes_at(&tampered, NOW) {
                    assert!(
                        verified.result.flags.hash_mismatch,
                        "{}: flip of byte {} bit {} went undetected",
                        alg, byte, bit
                    );
                    flips += 1;
                }
            }
        }
        assert!(flips >= (signed_len - 1) * 8);
    }

    println!("✓ Hash integrity: every decodable single-bit flip detected");
}

#[test]
fn test_freshness_boundary() {
    let config = config();
    let encoder = Encoder::from_config(&config, LayoutRegistry::default()).unwrap();

    let cases = vec![
        (NOW, false),
        (NOW - 60, false),
        (NOW - 61, true),
        (NOW + 1, true),
        (NOW - 3600, true),
    ];

    for (nonce, (timestamp, expected_expired)) in cases.into_iter().enumerate() {
        let gateway = Gateway::from_config(&config).unwrap();
        let hex = encoder.encode_hex(&environment_packet(1, nonce as u64, timestamp)).unwrap();
        let verified = gateway.inspect_at(&hex, NOW).unwrap();
        assert_eq!(
            verified.result.flags.timestamp_expired, expected_expired,
            "timestamp offset {}",
            timestamp as i64 - NOW as i64
        );
        assert_eq!(verified.result.valid, !expected_expired);
    }

    println!("✓ Freshness boundary: now-maxAge accepted, now-maxAge-1 and future expired");
}

#[test]
fn test_full_width_timestamps() {
    let config = GatewayConfig::builder(SECRET)
        .with_layout(PacketLayoutConfig {
            hash_len: 8,
            timestamp_len: 8,
            device_id_len: 4,
            nonce_len: 4,
        })
        .build()
        .unwrap();
    let (gateway, encoder) = fixture(&config);

    let fresh = encoder.encode_hex(&environment_packet(70_000, 1, NOW - 60)).unwrap();
    let stale = encoder.encode_hex(&environment_packet(70_000, 2, NOW - 61)).unwrap();

    let fresh = gateway.inspect_at(&fresh, NOW).unwrap();
    assert_eq!(fresh.packet.timestamp, NOW - 60);
    assert_eq!(fresh.packet.device_id, 70_000);
    assert!(fresh.result.valid);
    assert!(gateway.inspect_at(&stale, NOW).unwrap().result.flags.timestamp_expired);

    println!("✓ 8-byte timestamps compared as absolute epoch seconds");
}

#[test]
fn test_replay_detection() {
    let (gateway, encoder) = fixture(&config());
    let hex = encoder.encode_hex(&environment_packet(42, 7, NOW)).unwrap();

    let first = gateway.inspect_at(&hex, NOW).unwrap();
    assert!(!first.result.flags.nonce_reuse);
    assert!(first.result.valid);

    let second = gateway.inspect_at(&hex, NOW + 5).unwrap();
    assert!(second.result.flags.nonce_reuse);
    assert!(!second.result.valid);
    assert_eq!(second.result.integrity_score, 70);

    let other_nonce = encoder.encode_hex(&environment_packet(42, 8, NOW)).unwrap();
    assert!(!gateway.inspect_at(&other_nonce, NOW + 5).unwrap().result.flags.nonce_reuse);

    println!("✓ Replay: (42, 7) first seen, then flagged as reuse");
}

#[test]
fn test_in_batch_order_breaks_replay_ties() {
    let (gateway, encoder) = fixture(&config());
    let hex = encoder.encode_hex(&environment_packet(42, 7, NOW)).unwrap();

    let outcome = gateway.process_batch_at(vec![item_with(hex.clone()), item_with(hex)], NOW);
    assert_eq!(outcome.items.len(), 2);
    assert!(!result_of(&outcome.items[0]).flags.nonce_reuse);
    assert!(result_of(&outcome.items[1]).flags.nonce_reuse);
    assert_eq!(outcome.metrics.invalid, 1);

    println!("✓ Earlier batch item wins first-seen");
}

#[test]
fn test_drop_policy_threshold() {
    let config = GatewayConfig::builder(SECRET).with_drop_threshold(70).build().unwrap();
    let (gateway, encoder) = fixture(&config);

    // Expired only: 100 - 35 = 65, below threshold
    let expired = encoder.encode_hex(&environment_packet(1, 1, NOW - 120)).unwrap();
    // Nonce reuse only: 100 - 30 = 70, at threshold
    let fresh = encoder.encode_hex(&environment_packet(2, 1, NOW)).unwrap();

    let outcome = gateway.process_batch_at(
        vec![item_with(expired), item_with(fresh.clone()), item_with(fresh)],
        NOW,
    );

    assert_eq!(outcome.metrics.received, 3);
    assert_eq!(outcome.metrics.dropped, 1);
    assert_eq!(outcome.items.len(), 2);

    let scores: Vec<u8> = outcome.items.iter().map(|i| result_of(i).integrity_score).collect();
    assert_eq!(scores, vec![100, 70]);

    println!("✓ Drop policy: score 65 dropped, score 70 forwarded");
}

#[test]
fn test_unverifiable_items_fall_under_drop_policy() {
    let items = || {
        vec![
            item_with("7f0000000000000000000000".to_string()),
            item_with("not hex".to_string()),
            match json!({ "source": "lora-gw-3" }) {
                Value::Object(map) => map,
                _ => unreachable!(),
            },
        ]
    };

    // Lenient: forwarded with a zero score and the error attached
    let lenient = Gateway::from_config(&config()).unwrap();
    let outcome = lenient.process_batch_at(items(), NOW);
    assert_eq!(outcome.metrics.errored, 3);
    assert_eq!(outcome.items[0][VERIFY_ERROR_KEY]["kind"], "unsupported_header");
    assert_eq!(outcome.items[1][VERIFY_ERROR_KEY]["kind"], "invalid_hex");
    assert_eq!(outcome.items[2][VERIFY_ERROR_KEY]["kind"], "missing_packet");
    for forwarded in &outcome.items {
        let result = result_of(forwarded);
        assert!(!result.valid);
        assert_eq!(result.integrity_score, 0);
    }

    // Strict: nothing slips past the filter by being unreadable
    let strict_config = GatewayConfig::builder(SECRET).with_drop_threshold(70).build().unwrap();
    let (strict, encoder) = fixture(&strict_config);
    let mut batch = items();
    batch.push(item_with(encoder.encode_hex(&environment_packet(9, 9, NOW)).unwrap()));

    let outcome = strict.process_batch_at(batch, NOW);
    assert_eq!(outcome.metrics.dropped, 3);
    assert_eq!(outcome.metrics.errored, 0);
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(result_of(&outcome.items[0]).integrity_score, 100);

    println!("✓ Unreadable packets score 0: forwarded when lenient, dropped when strict");
}

#[test]
fn test_score_monotonicity_end_to_end() {
    let config = config();
    let encoder = Encoder::from_config(&config, LayoutRegistry::default()).unwrap();

    let expired_hex = encoder.encode_hex(&environment_packet(3, 3, NOW - 600)).unwrap();
    let mut tampered = hex::decode(&expired_hex).unwrap();
    let last = tampered.len() - 1;
    tampered[last] ^= 0xff;

    let one_flag = Gateway::from_config(&config).unwrap().inspect_at(&expired_hex, NOW).unwrap();
    let two_flags = Gateway::from_config(&config)
        .unwrap()
        .inspect_bytes_at(&tampered, NOW)
        .unwrap();

    assert!(two_flags.result.flags.hash_mismatch && two_flags.result.flags.timestamp_expired);
    assert!(!one_flag.result.flags.hash_mismatch && one_flag.result.flags.timestamp_expired);
    assert!(two_flags.result.integrity_score <= one_flag.result.integrity_score);

    println!("✓ Score monotonicity: two flags never outscore one");
}

#[test]
fn test_out_of_range_lowers_score_but_stays_valid() {
    let (gateway, encoder) = fixture(&config());
    let packet = environment_packet(8, 8, NOW)
        .with_field("temperature", 150.0)
        .with_field("battery", 120.0);
    let verified = gateway.inspect_at(&encoder.encode_hex(&packet).unwrap(), NOW).unwrap();

    assert!(verified.result.valid);
    assert_eq!(verified.result.flags.value_out_of_range, vec!["battery", "temperature"]);
    assert_eq!(verified.result.integrity_score, 80);

    println!("✓ Sensor anomalies are informational");
}

#[test]
fn test_custom_layout_registration() {
    let config = config();
    let mut registry = LayoutRegistry::default();
    let soil = FixedLayout::new(
        "soil",
        vec![
            FieldSpec::unsigned("moisture", 2, 10.0),
            FieldSpec::signed("soil_temperature", 2, 100.0),
        ],
    )
    .unwrap();
    registry.register(0x20, Arc::new(soil));

    let gateway = Gateway::new(&config, registry.clone(), Arc::new(MemoryReplayState::new())).unwrap();
    let encoder = Encoder::from_config(&config, registry).unwrap();

    let packet = CorePacket::new(0x20, NOW, 11, 1, Fields::new())
        .with_field("moisture", 41.7)
        .with_field("soil_temperature", -3.25);
    let verified = gateway.inspect_at(&encoder.encode_hex(&packet).unwrap(), NOW).unwrap();

    assert_eq!(verified.packet.fields, packet.fields);
    assert!(verified.result.valid);

    // The stock gateway does not know the profile
    let stock = Gateway::from_config(&config).unwrap();
    assert!(stock.inspect_at(&encoder.encode_hex(&packet).unwrap(), NOW).is_err());

    println!("✓ New device profiles added without touching framing");
}

#[test]
fn test_wrong_secret_flags_mismatch() {
    let (gateway, _) = fixture(&config());
    let other = GatewayConfig::builder("someone-else").build().unwrap();
    let forger = Encoder::from_config(&other, LayoutRegistry::default()).unwrap();

    let verified = gateway
        .inspect_at(&forger.encode_hex(&environment_packet(1, 1, NOW)).unwrap(), NOW)
        .unwrap();
    assert!(verified.result.flags.hash_mismatch);
    assert!(!verified.result.valid);
    assert_eq!(verified.result.integrity_score, 40);

    println!("✓ Foreign key rejected");
}

#[test]
fn test_concurrent_replay_safety() {
    let config = config();
    let encoder = Encoder::from_config(&config, LayoutRegistry::default()).unwrap();
    let raw = encoder.encode(&environment_packet(42, 7, NOW)).unwrap();
    let gateway = Arc::new(Gateway::from_config(&config).unwrap());

    let first_seen = Arc::new(Mutex::new(0usize));
    let mut threads = vec![];

    for _ in 0..10 {
        let gateway = Arc::clone(&gateway);
        let first_seen = Arc::clone(&first_seen);
        let raw = raw.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..100 {
                let verified = gateway.inspect_bytes_at(&raw, NOW).unwrap();
                if !verified.result.flags.nonce_reuse {
                    *first_seen.lock().unwrap() += 1;
                }
            }
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(*first_seen.lock().unwrap(), 1, "Pair must be first-seen exactly once");

    println!("✓ Concurrent safety: 1,000 verifications across 10 threads, one first-seen");
}

#[test]
fn test_replay_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replay.rkyv");
    let config = config();
    let encoder = Encoder::from_config(&config, LayoutRegistry::default()).unwrap();
    let hex = encoder.encode_hex(&environment_packet(42, 7, NOW)).unwrap();

    let state = Arc::new(MemoryReplayState::new());
    let gateway = Gateway::new(&config, LayoutRegistry::default(), state.clone()).unwrap();
    assert!(gateway.inspect_at(&hex, NOW).unwrap().result.valid);
    state.save_to(&path).unwrap();

    let restored = Arc::new(MemoryReplayState::load_from(&path).unwrap());
    assert_eq!(restored.tracked(), 1);
    let gateway = Gateway::new(&config, LayoutRegistry::default(), restored).unwrap();
    assert!(gateway.inspect_at(&hex, NOW + 1).unwrap().result.flags.nonce_reuse);

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(ReplaySnapshot::from_bytes(&bytes).unwrap().entries.len(), 1);

    println!("✓ Replay snapshot restores reuse decisions");
}

#[test]
fn test_config_file_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gateway.toml");
    std::fs::write(
        &path,
        "sharedSecret = \"from-file\"\nhashAlg = \"sha256\"\nhashLen = 6\ndropLowIntegrity = true\n",
    )
    .unwrap();

    let config = GatewayConfig::load(&path).unwrap();
    assert_eq!(config.hash_alg, HashAlgorithm::Sha256);
    assert_eq!(config.hash_len, 6);
    assert!(config.drop_low_integrity);
    assert_eq!(config.integrity_threshold, 70);

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "sharedSecret = \"k\"\nhashAlg = \"crc32\"\n").unwrap();
    assert!(GatewayConfig::load(&bad).unwrap_err().is_fatal());

    println!("✓ Configuration loaded from TOML, bad algorithm rejected up front");
}

#[test]
fn test_verification_latency_distribution() {
    let config = config();
    let (gateway, encoder) = fixture(&config);

    let raws: Vec<Vec<u8>> = (0..2000u64)
        .map(|n| encoder.encode(&environment_packet(n / 256, n % 256, NOW)).unwrap())
        .collect();

    let mut latencies = Vec::with_capacity(raws.len());
    for raw in &raws {
        let start = Instant::now();
        let verified = gateway.inspect_bytes_at(raw, NOW).unwrap();
        latencies.push(start.elapsed().as_micros() as f64);
        assert!(verified.result.valid);
    }

    let stats = statistical_analysis::LatencyStats::compute(&latencies);
    println!("\n{}", stats.report());

    assert!(stats.mean < 5000.0, "Mean latency {} exceeds 5ms", stats.mean);

    println!("✓ Latency distribution within bounds");
}
