//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code in the conductor core and the CLI MUST NOT
//! call sleep methods or park threads. Tasks wait on their cancellation token
//! or on a channel, never on a timer.
//! **Exceptions**: test code (`#[cfg(test)]` items and `tests/` directories)

use architectural_enforcement::{scan_workspace, workspace_root, PRODUCTION_ROOTS};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan_workspace(&workspace_root());

    if !violations.is_empty() {
        eprintln!("\nSleep or thread parking found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nWait on a CancellationToken or a channel instead.");

        panic!(
            "\nFound {} forbidden call(s) in production code.",
            violations.len()
        );
    }
}

/// The scan is only meaningful if it actually finds the sources
#[test]
fn test_production_roots_exist() {
    let root = workspace_root();
    for dir in PRODUCTION_ROOTS {
        assert!(root.join(dir).is_dir(), "missing source tree {dir}");
    }
}
