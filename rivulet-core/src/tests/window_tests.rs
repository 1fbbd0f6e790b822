use super::*;

// ── TimeWindow ────────────────────────────────────────────────────────────

#[test]
fn test_time_window_contains() {
    let w = TimeWindow::new(0, 1_000);
    assert!(w.contains(0));
    assert!(w.contains(999));
    assert!(!w.contains(1_000)); // end is exclusive
    assert_eq!(w.max_timestamp(), 999);
    assert_eq!(w.to_string(), "[0, 1000)");
}

#[test]
fn test_windowed_display() {
    let key = Windowed::new(7, TimeWindow::new(1_000, 2_000));
    assert_eq!(key.to_string(), "7@[1000, 2000)");
    assert_eq!(*key.key(), 7);
    assert_eq!(key.into_key(), 7);
}

// ── Tumbling ──────────────────────────────────────────────────────────────

#[test]
fn test_tumbling_assigns_floor_window() {
    let windows = TimeWindows::of(Duration::from_millis(1_000));
    assert_eq!(windows.windows_for(0), vec![TimeWindow::new(0, 1_000)]);
    assert_eq!(windows.windows_for(999), vec![TimeWindow::new(0, 1_000)]);
    assert_eq!(
        windows.windows_for(1_000),
        vec![TimeWindow::new(1_000, 2_000)]
    );
}

#[test]
fn test_tumbling_negative_timestamp() {
    let windows = TimeWindows::of(Duration::from_millis(1_000));
    assert_eq!(windows.windows_for(-1), vec![TimeWindow::new(-1_000, 0)]);
}

// ── Hopping ───────────────────────────────────────────────────────────────

#[test]
fn test_hopping_element_in_multiple_windows() {
    // size=10s, advance=5s -> each element belongs to 2 windows
    let windows = TimeWindows::of(Duration::from_secs(10)).advance_by(Duration::from_secs(5));
    let assigned = windows.windows_for(7_000);
    assert_eq!(
        assigned,
        vec![TimeWindow::new(0, 10_000), TimeWindow::new(5_000, 15_000)]
    );
    for w in &assigned {
        assert!(w.contains(7_000), "{w} should contain 7000ms");
    }
}

#[test]
fn test_hopping_windows_cover_timestamp() {
    // size=15s, advance=5s -> each element belongs to 3 windows
    let windows = TimeWindows::of(Duration::from_secs(15)).advance_by(Duration::from_secs(5));
    assert_eq!(windows.windows_for(12_000).len(), 3);
}

// ── Validation ────────────────────────────────────────────────────────────

#[test]
fn test_default_retention_is_one_day() {
    let windows = TimeWindows::of(Duration::from_secs(1));
    assert_eq!(windows.retention_ms(), DEFAULT_RETENTION_MS);
    assert!(windows.validate().is_ok());
}

#[test]
fn test_validate_rejects_bad_specs() {
    assert!(TimeWindows::of(Duration::ZERO).validate().is_err());
    assert!(
        TimeWindows::of(Duration::from_secs(1))
            .advance_by(Duration::from_secs(2))
            .validate()
            .is_err()
    );
    assert!(
        TimeWindows::of(Duration::from_secs(10))
            .until(Duration::from_secs(5))
            .validate()
            .is_err()
    );
}

#[test]
fn test_windows_clamp_at_time_bounds() {
    let windows = TimeWindows::of(Duration::from_millis(1_000));
    let assigned = windows.windows_for(EventTime::MAX - 10);
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0].end, EventTime::MAX);
    assert!(assigned[0].contains(EventTime::MAX - 10));

    let hopping = windows.advance_by(Duration::from_millis(500));
    assert_eq!(hopping.windows_for(EventTime::MAX - 10).len(), 2);

    let assigned = windows.windows_for(EventTime::MIN);
    assert_eq!(assigned.len(), 1);
    assert!(assigned[0].contains(EventTime::MIN));
}
