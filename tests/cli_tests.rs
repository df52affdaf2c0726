/*
 * PCAT Manager - CLI Integration Tests
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Process-level checks of the CLI surface: exit code 1 when
//! `/etc/pcat-manager.conf` can't be loaded, --help works without touching
//! any of that state.

use assert_cmd::Command;
use predicates::str::contains;

/// The test environment has no `/etc/pcat-manager.conf`, so this exercises
/// the real failure path end-to-end rather than a mocked one.
#[test]
fn missing_static_config_exits_with_code_one() {
    Command::cargo_bin("pcat-manager")
        .expect("find pcat-manager binary")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn help_flag_describes_daemon_and_distro_flags() {
    Command::cargo_bin("pcat-manager")
        .expect("find pcat-manager binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--daemon"))
        .stdout(contains("--distro"));
}
