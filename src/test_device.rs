/* Synthetic test device injection, gated behind the `dev-hooks` feature.
 * Lets a client (or a test script) describe a fake mouse in JSON and have it
 * appear on the bus exactly as a real hotplugged device would, without any
 * hidraw node or driver actor behind it. */

pub mod spec {
    use serde::Deserialize;

    use crate::device::{
        ActionType, ButtonInfo, Color, DeviceInfo, Dpi, LedInfo, LedMode, ProfileInfo,
        ResolutionInfo,
    };

    /* JSON schema mirrored from the companion daemon's test-device format.
     * Every field is optional; an empty object (or `""`) yields the minimum
     * sane one-profile, one-resolution, one-button device. */
    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    pub struct DeviceSpec {
        pub name: Option<String>,
        pub model: Option<String>,
        pub profiles: Vec<ProfileSpec>,
    }

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    pub struct ProfileSpec {
        pub name: Option<String>,
        pub is_active: bool,
        pub report_rate: Option<u32>,
        pub resolutions: Vec<ResolutionSpec>,
        pub buttons: Vec<ButtonSpec>,
        pub leds: Vec<LedSpec>,
    }

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    pub struct ResolutionSpec {
        pub dpi: Option<u32>,
        pub dpi_x: Option<u32>,
        pub dpi_y: Option<u32>,
        pub is_active: bool,
        pub is_default: bool,
    }

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    pub struct ButtonSpec {
        pub action_type: Option<u32>,
        pub mapping_value: Option<u32>,
    }

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    pub struct LedSpec {
        pub mode: Option<u32>,
        pub red: Option<u32>,
        pub green: Option<u32>,
        pub blue: Option<u32>,
    }

    /* Parse a `LoadTestDevice` JSON payload. An empty string is treated as */
    /* `{}`, producing the default minimum device rather than an error.    */
    pub fn parse_json(json: &str) -> Result<DeviceSpec, serde_json::Error> {
        if json.trim().is_empty() {
            return Ok(DeviceSpec::default());
        }
        serde_json::from_str(json)
    }

    fn action_type_from_u32(v: u32) -> ActionType {
        match v {
            0 => ActionType::None,
            1 => ActionType::Button,
            2 => ActionType::Special,
            3 => ActionType::Key,
            4 => ActionType::Macro,
            _ => ActionType::Unknown,
        }
    }

    /* Build a concrete `DeviceInfo` from a parsed spec. Any list left empty */
    /* in the JSON is filled with a single sane default entry so the device */
    /* always exposes at least one profile/resolution/button/LED.          */
    pub fn build_device_info(sysname: &str, spec: DeviceSpec) -> DeviceInfo {
        let mut profiles: Vec<ProfileInfo> = spec
            .profiles
            .into_iter()
            .enumerate()
            .map(|(idx, p)| build_profile(idx as u32, p))
            .collect();

        if profiles.is_empty() {
            profiles.push(build_profile(0, ProfileSpec::default()));
        }
        if !profiles.iter().any(|p| p.is_active) {
            profiles[0].is_active = true;
        }

        DeviceInfo {
            sysname: sysname.to_string(),
            name: spec.name.unwrap_or_else(|| "Test Device".to_string()),
            model: spec.model.unwrap_or_else(|| "test:0000:0000:0".to_string()),
            firmware_version: "0.0.0-test".to_string(),
            profiles,
            driver_config: crate::device_database::DriverConfig::default(),
        }
    }

    fn build_profile(index: u32, spec: ProfileSpec) -> ProfileInfo {
        let mut resolutions: Vec<ResolutionInfo> = spec
            .resolutions
            .into_iter()
            .enumerate()
            .map(|(idx, r)| build_resolution(idx as u32, r))
            .collect();
        if resolutions.is_empty() {
            resolutions.push(build_resolution(0, ResolutionSpec::default()));
        }

        let mut buttons: Vec<ButtonInfo> = spec
            .buttons
            .into_iter()
            .enumerate()
            .map(|(idx, b)| build_button(idx as u32, b))
            .collect();
        if buttons.is_empty() {
            buttons.push(build_button(0, ButtonSpec::default()));
        }

        let leds: Vec<LedInfo> = spec
            .leds
            .into_iter()
            .enumerate()
            .map(|(idx, l)| build_led(idx as u32, l))
            .collect();

        ProfileInfo {
            index,
            name: spec.name.unwrap_or_else(|| format!("Profile {index}")),
            is_active: spec.is_active,
            is_enabled: true,
            is_dirty: false,
            report_rate: spec.report_rate.unwrap_or(1000),
            report_rates: vec![125, 250, 500, 1000],
            angle_snapping: -1,
            debounce: -1,
            debounces: Vec::new(),
            resolutions,
            buttons,
            leds,
        }
    }

    fn build_resolution(index: u32, spec: ResolutionSpec) -> ResolutionInfo {
        let dpi = match (spec.dpi, spec.dpi_x, spec.dpi_y) {
            (_, Some(x), Some(y)) if x != y => Dpi::Separate { x, y },
            (Some(d), _, _) => Dpi::Unified(d),
            (_, Some(x), _) => Dpi::Unified(x),
            _ => Dpi::Unified(800),
        };

        ResolutionInfo {
            index,
            dpi,
            dpi_list: vec![400, 800, 1600, 3200],
            capabilities: Vec::new(),
            is_active: spec.is_active,
            is_default: spec.is_default,
            is_disabled: false,
        }
    }

    fn build_button(index: u32, spec: ButtonSpec) -> ButtonInfo {
        ButtonInfo {
            index,
            action_type: spec.action_type.map(action_type_from_u32).unwrap_or(ActionType::Button),
            action_types: vec![0, 1, 2, 3, 4],
            mapping_value: spec.mapping_value.unwrap_or(index),
            macro_entries: Vec::new(),
        }
    }

    fn build_led(index: u32, spec: LedSpec) -> LedInfo {
        LedInfo {
            index,
            mode: spec.mode.and_then(LedMode::from_u32).unwrap_or(LedMode::Off),
            modes: vec![LedMode::Off, LedMode::Solid, LedMode::Cycle, LedMode::Breathing],
            color: Color {
                red: spec.red.unwrap_or(0),
                green: spec.green.unwrap_or(0),
                blue: spec.blue.unwrap_or(0),
            },
            secondary_color: Color::default(),
            tertiary_color: Color::default(),
            color_depth: 1,
            effect_duration: 0,
            brightness: 255,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::spec::*;

    #[test]
    fn empty_json_yields_minimum_device() {
        let parsed = parse_json("").unwrap();
        let info = build_device_info("test0", parsed);
        assert_eq!(info.profiles.len(), 1);
        assert_eq!(info.profiles[0].resolutions.len(), 1);
        assert_eq!(info.profiles[0].buttons.len(), 1);
        assert!(info.profiles[0].is_active);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"name": "Fake Mouse", "profiles": [{"is_active": true, "report_rate": 500}]}"#;
        let parsed = parse_json(json).unwrap();
        let info = build_device_info("test1", parsed);
        assert_eq!(info.name, "Fake Mouse");
        assert_eq!(info.profiles[0].report_rate, 500);
        assert!(info.profiles[0].is_active);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(parse_json("{not valid json").is_err());
    }
}
