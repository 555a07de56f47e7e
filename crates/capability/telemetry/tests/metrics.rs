use bms_telemetry::{
    TelemetryMetrics, metrics, record_fields_decoded, record_frame_received,
    record_watchdog_reset,
};

#[test]
fn fresh_metrics_start_at_zero() {
    let local = TelemetryMetrics::new();
    assert_eq!(local.snapshot(), Default::default());
}

#[test]
fn global_counters_accumulate() {
    let before = metrics().snapshot();
    record_frame_received();
    record_fields_decoded(3);
    record_watchdog_reset();
    let after = metrics().snapshot();
    assert!(after.frames_received >= before.frames_received + 1);
    assert!(after.fields_decoded >= before.fields_decoded + 3);
    assert!(after.watchdog_resets >= before.watchdog_resets + 1);
}
