//! Small helpers shared across handlers: wall-clock time as spec.md's
//! unix-seconds floats, and scan id allocation.

pub fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// High-resolution timestamp prefix (hex, fixed width so lexicographic
/// order matches chronological order) plus a random suffix, per spec.md
/// §3's ScanID definition.
pub fn allocate_scan_id() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{nanos:016x}-{}", &suffix[..8])
}
