use acktrace::prelude::*;
use acktrace::correlation::DiagnosticKind;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{Duration, NaiveDateTime};
use proptest::prelude::*;
use std::io::Write;

const TOPIC: &str =
    "application/46f95f5e-fb72-4178-9652-e5976b974ea2/device/70b3d57ed005e1a1/event/up";
const TARGET: [u8; 4] = [0xc2, 0x67, 0x45, 0x23];

fn target() -> DevAddr {
    DevAddr::new(TARGET)
}

fn base_time() -> NaiveDateTime {
    acktrace::log::parse_timestamp("2024-01-31 10:00:00.000").unwrap()
}

fn fmt(ts: NaiveDateTime) -> String {
    acktrace::log::format_timestamp(&ts)
}

fn send_line(ts: NaiveDateTime, label: &str) -> String {
    format!("SERIAL [{}] [LoRaWAN] Sending uplink packet || {}", fmt(ts), label)
}

fn gateway_line(ts: NaiveDateTime) -> String {
    format!(r#"MQTT [{}] TOPIC: {} || MESSAGE: {{"deduplicationId":"x"}}"#, fmt(ts), TOPIC)
}

fn downlink_line(ts: NaiveDateTime, addr: [u8; 4]) -> String {
    let payload = [0x60, addr[0], addr[1], addr[2], addr[3], 0x20, 0x00, 0x01, 0x12, 0x34];
    format!(
        r#"MQTT [{}] TOPIC: gateway/0016c001f153a14c/command/down || MESSAGE: {{"items":[{{"phyPayload":"{}"}}]}}"#,
        fmt(ts),
        STANDARD.encode(payload)
    )
}

fn marker_line(ts: NaiveDateTime) -> String {
    format!("SERIAL [{}] [MAC] MAC scheme set to ALOHA", fmt(ts))
}

fn noise_line(ts: NaiveDateTime) -> String {
    format!("SERIAL [{}] [Radio] RX window closed", fmt(ts))
}

fn write_log(lines: &[String]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

#[test]
fn test_acked_packet_end_to_end() {
    let t = base_time();
    let lines = vec![
        marker_line(t - Duration::seconds(5)),
        send_line(t, "retry1"),
        gateway_line(t + Duration::milliseconds(500)),
        downlink_line(t + Duration::milliseconds(1000), TARGET),
    ];
    let file = write_log(&lines);

    let correlation = correlate_file(file.path(), &Markers::default(), target()).unwrap();
    assert_eq!(correlation.records.len(), 1);

    let json = serde_json::to_value(&correlation.records[0]).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "message": "retry1",
            "sendTimestamp": "2024-01-31 10:00:00.000",
            "gatewayTimestamp": "2024-01-31 10:00:00.500",
            "ackTimestamp": "2024-01-31 10:00:01.000",
        })
    );

    let samples = collect_samples(&correlation.records);
    assert_eq!(samples.len(), 1);
    assert!((samples[0].seconds() - 1.0).abs() < 1e-9);
}

#[test]
fn test_foreign_identity_end_to_end() {
    let t = base_time();
    let lines = vec![
        marker_line(t - Duration::seconds(5)),
        send_line(t, "retry1"),
        gateway_line(t + Duration::milliseconds(500)),
        downlink_line(t + Duration::milliseconds(1000), [0xde, 0xad, 0xbe, 0xef]),
    ];
    let file = write_log(&lines);

    let correlation = correlate_file(file.path(), &Markers::default(), target()).unwrap();
    assert_eq!(correlation.records[0].ack_timestamp, None);
    assert!(collect_samples(&correlation.records).is_empty());
}

#[test]
fn test_missing_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let result = correlate_file(dir.path().join("missing.txt"), &Markers::default(), target());
    assert!(result.is_err());
}

#[test]
fn test_invalid_utf8_is_tolerated() {
    let t = base_time();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{}", marker_line(t)).unwrap();
    writeln!(file, "{}", send_line(t + Duration::seconds(1), "a")).unwrap();
    file.write_all(b"MQTT [2024-01-31 10:00:01.100] TOPIC: junk \xff\xfe\n").unwrap();
    writeln!(file, "{}", gateway_line(t + Duration::milliseconds(1500))).unwrap();
    file.flush().unwrap();

    let correlation = correlate_file(file.path(), &Markers::default(), target()).unwrap();
    assert_eq!(correlation.records.len(), 1);
    assert!(correlation.records[0].reached_gateway());
}

#[test]
fn test_crlf_line_endings() {
    let t = base_time();
    let text = [
        marker_line(t),
        send_line(t + Duration::seconds(1), "crlf"),
        gateway_line(t + Duration::milliseconds(1400)),
    ]
    .join("\r\n");

    let correlation = correlate_str(&text, &Markers::default(), target());
    assert_eq!(correlation.records[0].message, "crlf");
    assert!(correlation.records[0].reached_gateway());
}

#[test]
fn test_analysis_writes_results() {
    let t = base_time();
    let lines = vec![
        marker_line(t - Duration::seconds(5)),
        send_line(t, "retry1"),
        gateway_line(t + Duration::milliseconds(500)),
        downlink_line(t + Duration::milliseconds(1000), TARGET),
        send_line(t + Duration::seconds(10), "retry2"),
    ];
    let file = write_log(&lines);
    let out = tempfile::tempdir().unwrap();

    let config = AnalysisConfig::default()
        .with_target(target())
        .with_output_dir(out.path());
    let analysis = Analysis::new(config).unwrap();
    let outcome = analysis.run(file.path()).unwrap();

    assert_eq!(outcome.report.total_packets, 2);
    assert_eq!(outcome.report.acked, 1);
    assert!((outcome.report.ack_loss_rate - 0.5).abs() < 1e-9);

    let written = analysis.save_results(file.path(), &outcome).unwrap();
    assert_eq!(written.len(), 4);
    for path in &written {
        assert!(path.exists(), "{} missing", path.display());
    }

    let records: Vec<PacketRecord> =
        serde_json::from_str(&std::fs::read_to_string(&written[0]).unwrap()).unwrap();
    assert_eq!(records, outcome.correlation.records);
}

#[test]
fn test_same_named_logs_keep_separate_results() {
    let t = base_time();
    let root = tempfile::tempdir().unwrap();
    let out = root.path().join("out");

    let acked = vec![
        marker_line(t - Duration::seconds(5)),
        send_line(t, "retry1"),
        gateway_line(t + Duration::milliseconds(500)),
        downlink_line(t + Duration::milliseconds(1000), TARGET),
    ];
    let lost = vec![
        marker_line(t - Duration::seconds(5)),
        send_line(t, "retry1"),
        gateway_line(t + Duration::milliseconds(500)),
    ];

    let mut logs = Vec::new();
    for (scheme, lines) in [("ALOHA", &acked), ("CSMA", &lost)] {
        let folder = root.path().join(scheme);
        std::fs::create_dir_all(&folder).unwrap();
        let log = folder.join("DN_250_tr1.txt");
        std::fs::write(&log, lines.join("\n")).unwrap();
        logs.push(log);
    }
    // Same log twice in the same second
    logs.push(logs[0].clone());

    let config = AnalysisConfig::default().with_target(target()).with_output_dir(&out);
    let analysis = Analysis::new(config).unwrap();

    let mut written = Vec::new();
    for log in &logs {
        let outcome = analysis.run(log).unwrap();
        written.extend(analysis.save_results(log, &outcome).unwrap());
    }

    let unique: std::collections::HashSet<_> = written.iter().collect();
    assert_eq!(unique.len(), 12);
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 12);

    let mut acked_counts: Vec<usize> = acktrace::metrics::analyzer::load_saved_reports(&out)
        .unwrap()
        .iter()
        .map(|r| r.acked)
        .collect();
    acked_counts.sort();
    assert_eq!(acked_counts, vec![0, 1, 1]);
}

#[test]
fn test_analysis_requires_target() {
    assert!(Analysis::new(AnalysisConfig::default()).is_err());
}

#[derive(Debug, Clone)]
enum Event {
    Send,
    Gateway,
    Downlink([u8; 4]),
    Noise,
}

fn event_strategy(addr: impl Strategy<Value = [u8; 4]>) -> impl Strategy<Value = Event> {
    prop_oneof![
        2 => Just(Event::Send),
        2 => Just(Event::Gateway),
        2 => addr.prop_map(Event::Downlink),
        1 => Just(Event::Noise),
    ]
}

fn foreign_addr() -> impl Strategy<Value = [u8; 4]> {
    any::<[u8; 4]>().prop_filter("must differ from target", |a| *a != TARGET)
}

fn any_addr() -> impl Strategy<Value = [u8; 4]> {
    prop_oneof![Just(TARGET), foreign_addr()]
}

fn render(events: &[(Event, u16)], with_marker: bool) -> Vec<String> {
    let mut t = base_time();
    let mut lines = Vec::new();
    if with_marker {
        lines.push(marker_line(t));
    }
    for (i, (event, gap)) in events.iter().enumerate() {
        t += Duration::milliseconds(*gap as i64);
        lines.push(match event {
            Event::Send => send_line(t, &format!("pkt{}", i)),
            Event::Gateway => gateway_line(t),
            Event::Downlink(addr) => downlink_line(t, *addr),
            Event::Noise => noise_line(t),
        });
    }
    lines
}

proptest! {
    #[test]
    fn prop_no_marker_means_no_records(
        events in prop::collection::vec((event_strategy(any_addr()), 0u16..2000), 0..60)
    ) {
        let lines = render(&events, false);
        let correlation = correlate_lines(&lines, &Markers::default(), target());
        prop_assert!(correlation.records.is_empty());
        prop_assert!(!correlation.has_session());
    }

    #[test]
    fn prop_one_record_per_send_in_order(
        events in prop::collection::vec((event_strategy(any_addr()), 0u16..2000), 0..60)
    ) {
        let lines = render(&events, true);
        let correlation = correlate_lines(&lines, &Markers::default(), target());

        let sends = events.iter().filter(|(e, _)| matches!(e, Event::Send)).count();
        prop_assert_eq!(correlation.records.len(), sends);

        let times: Vec<_> = correlation.records.iter().map(|r| r.send_timestamp).collect();
        prop_assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn prop_chain_is_monotonic_for_ordered_logs(
        events in prop::collection::vec((event_strategy(any_addr()), 0u16..2000), 0..60)
    ) {
        let lines = render(&events, true);
        let correlation = correlate_lines(&lines, &Markers::default(), target());
        for record in &correlation.records {
            prop_assert!(record.ack_timestamp.is_none() || record.gateway_timestamp.is_some());
            prop_assert!(record.causality_violation().is_none());
        }
        // Target downlinks ahead of the gateway arrival are the only findings on an ordered log
        prop_assert!(correlation
            .diagnostics
            .iter()
            .all(|d| matches!(d.kind, DiagnosticKind::UnattributedAck { .. })),
            "non-UnattributedAck diagnostic on an ordered log");
    }

    #[test]
    fn prop_foreign_downlinks_never_ack(
        events in prop::collection::vec((event_strategy(foreign_addr()), 0u16..2000), 0..60)
    ) {
        let lines = render(&events, true);
        let correlation = correlate_lines(&lines, &Markers::default(), target());
        prop_assert!(correlation.records.iter().all(|r| r.ack_timestamp.is_none()));
    }

    #[test]
    fn prop_first_gateway_is_kept(extra in 1usize..5, gap in 1i64..500) {
        let t = base_time();
        let mut lines = vec![marker_line(t), send_line(t, "p")];
        for i in 0..=extra {
            lines.push(gateway_line(t + Duration::milliseconds(gap * (i as i64 + 1))));
        }
        let correlation = correlate_lines(&lines, &Markers::default(), target());
        let record = &correlation.records[0];
        prop_assert_eq!(record.uplink_delay_millis(), Some(gap));
        prop_assert_eq!(correlation.stats.duplicate_gateway, extra);
    }

    #[test]
    fn prop_engine_is_idempotent(
        events in prop::collection::vec((event_strategy(any_addr()), 0u16..2000), 0..40)
    ) {
        let file = write_log(&render(&events, true));
        let first = correlate_file(file.path(), &Markers::default(), target()).unwrap();
        let second = correlate_file(file.path(), &Markers::default(), target()).unwrap();
        prop_assert_eq!(first, second);
    }
}
