//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Production code MUST NOT use blocking I/O. Sockets, HTTP and
//! processes go through tokio and reqwest's async client.
//!
//! **Exceptions**: the configuration loader reads its file with `std::fs`
//! once, before the server starts.

use architectural_enforcement::{production_files, report, Violation};

/// Files allowed to use `std::fs`, by path suffix
const FS_ALLOWED: &[&str] = &["relay/core/src/config/mod.rs"];

const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::net::TcpStream", "Blocking network I/O"),
    ("std::net::TcpListener", "Blocking network I/O"),
    ("std::net::UdpSocket", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("block_on(", "Blocking on a future"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::thread::spawn", "OS thread outside the runtime"),
];

#[test]
fn test_no_blocking_io_in_production_code() {
    let mut violations = Vec::new();

    for file in production_files() {
        let fs_allowed = FS_ALLOWED.iter().any(|suffix| file.is(suffix));

        for line in file.production_lines() {
            if !fs_allowed && (line.code.contains("std::fs::") || line.code.contains("use std::fs"))
            {
                violations.push(Violation::at(&file, &line, "Blocking file I/O"));
            }
            for (pattern, kind) in BLOCKING_PATTERNS {
                if line.code.contains(pattern) {
                    violations.push(Violation::at(&file, &line, kind));
                }
            }
        }
    }

    report(
        "all I/O must be async",
        &violations,
        &[
            "✅ REQUIRED async I/O:",
            "  - tokio::net::TcpListener::bind().await",
            "  - reqwest::Client::post().send().await",
            "  - tokio::fs::read_to_string().await",
        ],
    );
}

#[test]
fn test_std_net_limited_to_addresses() {
    // SocketAddr and friends are plain data; sockets are not
    let mut violations = Vec::new();

    for file in production_files() {
        for line in file.production_lines() {
            if line.code.contains("use std::net::")
                && !line.code.contains("SocketAddr")
                && !line.code.contains("IpAddr")
            {
                violations.push(Violation::at(&file, &line, "std::net import"));
            }
        }
    }

    report("std::net for addresses only", &violations, &[]);
}
