//! Property-based tests for configuration module
//!
//! These tests use proptest to generate random configurations and verify
//! validation and serialization round-trips.

use super::*;
use proptest::prelude::*;

prop_compose! {
    fn valid_output_config(index: usize)(
        x in -4000i32..4000,
        y in -4000i32..4000,
        width in 1i32..8000,
        height in 1i32..8000,
        scale in 1i32..4,
        refresh_mhz in 1000i32..360_000,
        enabled in any::<bool>(),
    ) -> OutputConfig {
        OutputConfig {
            name: format!("OUT-{}", index),
            x,
            y,
            width,
            height,
            scale,
            refresh_mhz,
            enabled,
            ..OutputConfig::default()
        }
    }
}

prop_compose! {
    fn valid_xwayland_config()(
        enabled in any::<bool>(),
        restart_delay_ms in 0u64..60_000,
        restart_limit in 0u32..10,
        stable_period_secs in 0u64..600,
        ready_timeout_ms in 1u64..60_000,
        stop_timeout_ms in 0u64..10_000,
    ) -> XWaylandConfig {
        XWaylandConfig {
            enabled,
            binary: None,
            restart_delay_ms,
            restart_limit,
            stable_period_secs,
            ready_timeout_ms,
            stop_timeout_ms,
            extra_args: Vec::new(),
        }
    }
}

prop_compose! {
    fn valid_config()(
        first in valid_output_config(1),
        second in valid_output_config(2),
        two_outputs in any::<bool>(),
        xwayland in valid_xwayland_config(),
        dispatch_interval_ms in 1u64..1000,
        viewporter in any::<bool>(),
    ) -> KeystoneConfig {
        let mut outputs = vec![first];
        if two_outputs {
            outputs.push(second);
        }
        KeystoneConfig {
            general: GeneralConfig {
                dispatch_interval_ms,
                ..GeneralConfig::default()
            },
            outputs,
            viewporter: ExtensionConfig { enabled: viewporter },
            xwayland,
            ..KeystoneConfig::default()
        }
    }
}

proptest! {
    #[test]
    fn prop_generated_configs_validate(config in valid_config()) {
        prop_assert!(config.validate().is_ok());
    }

    #[test]
    fn prop_toml_roundtrip(config in valid_config()) {
        let text = toml::to_string(&config).unwrap();
        let parsed: KeystoneConfig = toml::from_str(&text).unwrap();
        prop_assert_eq!(parsed, config);
    }

    #[test]
    fn prop_nonpositive_mode_rejected(width in -100i32..=0, height in 1i32..100) {
        let mut config = KeystoneConfig::default();
        config.outputs[0].width = width;
        config.outputs[0].height = height;
        prop_assert!(config.validate().is_err());
    }
}
