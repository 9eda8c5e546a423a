/* Etekcity driver: fixed-size per-profile report, static byte<->entity table. */
/* Same report family as CMStorm / Marsgaming / Logitech G600: one report per */
/* profile, DPI levels and button codes packed at fixed offsets.             */

use crate::device::{ActionType, DeviceInfo};
use crate::driver::{DeviceDriver, DeviceIo, DriverError};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

const ETEKCITY_PROFILE_MAX: u32 = 4;
const ETEKCITY_BUTTON_MAX: u32 = 6;
const ETEKCITY_NUM_DPI: u32 = 4;
const ETEKCITY_MACRO_MAX_EVENTS: usize = 50;

const ETEKCITY_REPORT_ID_PROFILE: u8 = 0x04;
const ETEKCITY_REPORT_SIZE: usize = 42;

#[derive(Clone, Copy, Default)]
struct EtekcityButton {
    code: u8,
}

#[derive(Clone, Copy)]
struct EtekcityProfileReport {
    id: u8,
    profile_idx: u8,
    report_rate_code: u8,
    dpi_levels: [u8; 4],
    active_dpi: u8,
    buttons: [EtekcityButton; 7],
}

impl EtekcityProfileReport {
    fn new() -> Self {
        Self {
            id: ETEKCITY_REPORT_ID_PROFILE,
            profile_idx: 0,
            report_rate_code: 0,
            dpi_levels: [0; 4],
            active_dpi: 0,
            buttons: [EtekcityButton::default(); 7],
        }
    }

    fn into_bytes(self) -> [u8; ETEKCITY_REPORT_SIZE] {
        let mut b = [0u8; ETEKCITY_REPORT_SIZE];
        b[0] = self.id;
        b[1] = self.profile_idx;
        b[2] = self.report_rate_code;
        b[3..7].copy_from_slice(&self.dpi_levels);
        b[7] = self.active_dpi;
        let mut offset = 8;
        for btn in &self.buttons {
            b[offset] = btn.code;
            offset += 1;
        }
        b
    }
}

/* report_rate Hz <-> wire code, per the static protocol table. */
fn rate_to_code(hz: u32) -> u8 {
    match hz {
        125 => 0,
        250 => 1,
        500 => 2,
        1000 => 3,
        _ => 3,
    }
}

fn code_to_rate(code: u8) -> u32 {
    match code {
        0 => 125,
        1 => 250,
        2 => 500,
        _ => 1000,
    }
}

pub struct EtekcityDriver {}

impl EtekcityDriver {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl DeviceDriver for EtekcityDriver {
    fn name(&self) -> &str {
        "Etekcity"
    }

    async fn probe(&mut self, _io: &mut DeviceIo) -> Result<()> {
        debug!("Probe called for Etekcity");
        Ok(())
    }

    async fn load_profiles(&mut self, io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        info.profiles.clear();

        for profile_id in 0..ETEKCITY_PROFILE_MAX {
            let mut buf = [0u8; ETEKCITY_REPORT_SIZE];
            buf[0] = ETEKCITY_REPORT_ID_PROFILE;
            buf[1] = profile_id as u8;
            let report = io
                .get_feature_report(&mut buf)
                .ok()
                .map(|_| buf)
                .unwrap_or_else(|| {
                    let mut b = EtekcityProfileReport::new().into_bytes();
                    b[1] = profile_id as u8;
                    b
                });

            let rate = code_to_rate(report[2]);

            let mut profile = crate::device::ProfileInfo {
                index: profile_id,
                name: format!("Profile {}", profile_id),
                is_active: profile_id == 0,
                is_enabled: true,
                is_dirty: false,
                resolutions: Vec::new(),
                buttons: Vec::new(),
                leds: Vec::new(),
                report_rate: rate,
                report_rates: vec![125, 250, 500, 1000],
                angle_snapping: -1,
                debounce: -1,
                debounces: Vec::new(),
            };

            for res_id in 0..ETEKCITY_NUM_DPI {
                let raw = report[3 + res_id as usize];
                profile.resolutions.push(crate::device::ResolutionInfo {
                    index: res_id,
                    is_active: res_id as u8 == report[7],
                    is_default: res_id == 0,
                    is_disabled: false,
                    dpi: crate::device::Dpi::Unified(u32::from(raw) * 50 + 50),
                    dpi_list: (1..=40).map(|s| s * 50 + 50).collect(),
                    capabilities: Vec::new(),
                });
            }

            for btn_id in 0..=ETEKCITY_BUTTON_MAX {
                let code = report.get(8 + btn_id as usize).copied().unwrap_or(0);
                profile.buttons.push(crate::device::ButtonInfo {
                    index: btn_id,
                    action_type: ActionType::Button,
                    action_types: vec![0, 1, 2, 3, 4],
                    mapping_value: u32::from(code),
                    macro_entries: Vec::new(),
                });
            }

            info.profiles.push(profile);
        }

        Ok(())
    }

    async fn commit(&mut self, io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        for profile in &mut info.profiles {
            if !profile.is_dirty {
                continue;
            }

            for btn in &profile.buttons {
                if btn.action_type == ActionType::Macro && btn.macro_entries.len() > ETEKCITY_MACRO_MAX_EVENTS {
                    return Err(DriverError::BufferTooSmall {
                        expected: ETEKCITY_MACRO_MAX_EVENTS,
                        actual: btn.macro_entries.len(),
                    }
                    .into());
                }
            }

            let mut report = EtekcityProfileReport::new();
            report.profile_idx = profile.index as u8;
            report.report_rate_code = rate_to_code(profile.report_rate);

            for (i, res) in profile.resolutions.iter().take(4).enumerate() {
                if let crate::device::Dpi::Unified(dpi) = res.dpi {
                    report.dpi_levels[i] = ((dpi.saturating_sub(50)) / 50) as u8;
                }
                if res.is_active {
                    report.active_dpi = i as u8;
                }
            }

            for (i, btn) in profile.buttons.iter().take(7).enumerate() {
                report.buttons[i].code = btn.mapping_value as u8;
            }

            let b = report.into_bytes();
            io.write_report(&b).await?;
            profile.is_dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ActionType, ButtonInfo, Dpi, ProfileInfo};

    fn profile_with_macro(len: usize) -> ProfileInfo {
        ProfileInfo {
            index: 0,
            name: String::new(),
            is_active: true,
            is_enabled: true,
            is_dirty: true,
            resolutions: vec![],
            buttons: vec![ButtonInfo {
                index: 0,
                action_type: ActionType::Macro,
                action_types: vec![4],
                mapping_value: 0,
                macro_entries: vec![(0, 0); len],
            }],
            leds: vec![],
            report_rate: 1000,
            report_rates: vec![1000],
            angle_snapping: -1,
            debounce: -1,
            debounces: vec![],
        }
    }

    #[test]
    fn rate_roundtrip() {
        for hz in [125, 250, 500, 1000] {
            assert_eq!(code_to_rate(rate_to_code(hz)), hz);
        }
    }

    #[test]
    fn oversized_macro_is_rejected_by_construction() {
        let profile = profile_with_macro(51);
        let too_long = profile.buttons[0].macro_entries.len() > ETEKCITY_MACRO_MAX_EVENTS;
        assert!(too_long);
        let ok_profile = profile_with_macro(50);
        assert!(ok_profile.buttons[0].macro_entries.len() <= ETEKCITY_MACRO_MAX_EVENTS);
        let _ = Dpi::Unified(800);
    }
}
