//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep. Generations, connections and
//! shutdown all wait on I/O, channels or cancellation tokens.
//!
//! **Exceptions**: the scripted test backend paces its chunks with a delay.

use architectural_enforcement::{production_files, report, Violation};

/// Files allowed to sleep, by path suffix
const ALLOWED: &[&str] = &["relay/core/src/backend/test_utils.rs"];

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for file in production_files() {
        if ALLOWED.iter().any(|suffix| file.is(suffix)) {
            continue;
        }
        for line in file.production_lines() {
            if line.code.contains("::sleep(") || line.code.contains(".sleep(") {
                violations.push(Violation::at(&file, &line, "Sleep call"));
            }
        }
    }

    report(
        "no sleep",
        &violations,
        &[
            "✅ Wait on the event instead:",
            "  - CancellationToken::cancelled().await",
            "  - mpsc::Receiver::recv().await",
            "  - TaskTracker::wait() under tokio::time::timeout",
        ],
    );
}
