//! Integration Test: Panic Prohibition
//!
//! **Policy**: A failing client, backend or config never takes the daemon
//! down. Production code propagates errors with `?` or handles them; it does
//! not `unwrap()`, `expect()` or `panic!()`.

use architectural_enforcement::{production_files, report, Violation};

const PANICKING_CALLS: &[(&str, &str)] = &[
    (".unwrap()", "unwrap"),
    (".expect(", "expect"),
    ("panic!(", "panic"),
    ("todo!(", "todo"),
    ("unimplemented!(", "unimplemented"),
];

#[test]
fn test_no_panics_in_production_code() {
    let mut violations = Vec::new();

    for file in production_files() {
        for line in file.production_lines() {
            for (pattern, kind) in PANICKING_CALLS {
                if line.code.contains(pattern) {
                    violations.push(Violation::at(&file, &line, kind));
                }
            }
        }
    }

    report(
        "no panics in production",
        &violations,
        &[
            "✅ Instead:",
            "  - propagate with `?` and a typed error",
            "  - unwrap_or / unwrap_or_default / unwrap_or_else",
            "  - log and recover at the connection boundary",
        ],
    );
}
