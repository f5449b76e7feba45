// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use taskd_core::Config;

#[test]
fn builds_from_default_config() {
    let gate = Gate::from_config(&Config::default()).unwrap();
    assert!(gate.scan_command("echo hello").is_allowed());
}

#[test]
fn config_patterns_flow_into_masking() {
    let mut config = Config::default();
    config.sensitive_patterns = vec![r"internal-token-\d+".to_string()];
    let gate = Gate::from_config(&config).unwrap();

    let (masked, hits) = gate.mask("auth with internal-token-9911 now");
    assert_eq!(masked, "auth with [MASKED:9911] now");
    assert_eq!(hits.len(), 1);
}

#[test]
fn config_signatures_flow_into_classification() {
    let mut config = Config::default();
    config.rate_limit_signatures = vec!["cooldown_active".to_string()];
    let gate = Gate::from_config(&config).unwrap();
    assert_eq!(
        gate.classify("server: cooldown_active"),
        taskd_core::FailureKind::RateLimited
    );
}

#[test]
fn bad_config_pattern_surfaces_at_boot() {
    let mut config = Config::default();
    config.sensitive_patterns = vec!["(".to_string()];
    assert!(Gate::from_config(&config).is_err());
}

#[test]
fn gate_clones_share_compiled_patterns() {
    let gate = Gate::from_config(&Config::default()).unwrap();
    let clone = gate.clone();
    assert!(matches!(
        clone.scan_command("rm -rf /"),
        taskd_core::ScanVerdict::Blocked { .. }
    ));
}
