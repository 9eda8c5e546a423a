/* MarsGaming driver: fixed-size per-profile report, static byte<->entity table. */
/* Same report family as CM Storm / Etekcity / Logitech G600.                  */
/*                                                                             */
/* The "media" and "fire" button actions are known to exist in the firmware's  */
/* configuration tool but no capture of their wire encoding has been found;    */
/* `encode_media_action` / `encode_fire_action` are stubs until one turns up.  */

use crate::device::{ActionType, DeviceInfo};
use crate::driver::{DeviceDriver, DeviceIo};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

const MARSGAMING_PROFILE_MAX: u32 = 3;
const MARSGAMING_BUTTON_MAX: u32 = 6;
const MARSGAMING_NUM_DPI: u32 = 4;

const MARSGAMING_REPORT_ID_PROFILE: u8 = 0x06;
const MARSGAMING_REPORT_SIZE: usize = 40;

struct MarsgamingProfileReport {
    id: u8,
    profile_idx: u8,
    report_rate_code: u8,
    dpi_levels: [u8; 4],
    active_dpi: u8,
    buttons: [u8; 7],
}

impl MarsgamingProfileReport {
    fn new() -> Self {
        Self {
            id: MARSGAMING_REPORT_ID_PROFILE,
            profile_idx: 0,
            report_rate_code: 0,
            dpi_levels: [0; 4],
            active_dpi: 0,
            buttons: [0; 7],
        }
    }

    fn into_bytes(&self) -> [u8; MARSGAMING_REPORT_SIZE] {
        let mut b = [0u8; MARSGAMING_REPORT_SIZE];
        b[0] = self.id;
        b[1] = self.profile_idx;
        b[2] = self.report_rate_code;
        b[3..7].copy_from_slice(&self.dpi_levels);
        b[7] = self.active_dpi;
        b[8..15].copy_from_slice(&self.buttons);
        b
    }
}

fn rate_to_code(hz: u32) -> u8 {
    match hz {
        125 => 0,
        250 => 1,
        500 => 2,
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

/* No known wire encoding for the "media" action class. Always Unknown. */
fn encode_media_action(_mapping_value: u32) -> Option<u8> {
    None
}

/* No known wire encoding for the "fire" (rapid-click burst) action class. */
fn encode_fire_action(_mapping_value: u32) -> Option<u8> {
    None
}

pub struct MarsGamingDriver {}

impl MarsGamingDriver {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl DeviceDriver for MarsGamingDriver {
    fn name(&self) -> &str {
        "MarsGaming"
    }

    async fn probe(&mut self, _io: &mut DeviceIo) -> Result<()> {
        debug!("Probe called for MarsGaming");
        Ok(())
    }

    async fn load_profiles(&mut self, io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        info.profiles.clear();

        for profile_id in 0..MARSGAMING_PROFILE_MAX {
            let mut buf = [0u8; MARSGAMING_REPORT_SIZE];
            buf[0] = MARSGAMING_REPORT_ID_PROFILE;
            buf[1] = profile_id as u8;
            let report = io
                .get_feature_report(&mut buf)
                .ok()
                .map(|_| buf)
                .unwrap_or_else(|| {
                    let mut b = MarsgamingProfileReport::new().into_bytes();
                    b[1] = profile_id as u8;
                    b
                });

            let mut profile = crate::device::ProfileInfo {
                index: profile_id,
                name: format!("Profile {}", profile_id),
                is_active: profile_id == 0,
                is_enabled: true,
                is_dirty: false,
                resolutions: Vec::new(),
                buttons: Vec::new(),
                leds: Vec::new(),
                report_rate: code_to_rate(report[2]),
                report_rates: vec![125, 250, 500, 1000],
                angle_snapping: -1,
                debounce: -1,
                debounces: Vec::new(),
            };

            for res_id in 0..MARSGAMING_NUM_DPI {
                let raw = report[3 + res_id as usize];
                profile.resolutions.push(crate::device::ResolutionInfo {
                    index: res_id,
                    is_active: res_id as u8 == report[7],
                    is_default: res_id == 0,
                    is_disabled: false,
                    dpi: crate::device::Dpi::Unified(u32::from(raw) * 100 + 100),
                    dpi_list: (1..=32).map(|s| s * 100 + 100).collect(),
                    capabilities: Vec::new(),
                });
            }

            for btn_id in 0..=MARSGAMING_BUTTON_MAX {
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

            let mut report = MarsgamingProfileReport::new();
            report.profile_idx = profile.index as u8;
            report.report_rate_code = rate_to_code(profile.report_rate);

            for (i, res) in profile.resolutions.iter().take(4).enumerate() {
                if let crate::device::Dpi::Unified(dpi) = res.dpi {
                    report.dpi_levels[i] = (dpi.saturating_sub(100) / 100) as u8;
                }
                if res.is_active {
                    report.active_dpi = i as u8;
                }
            }

            for (i, btn) in profile.buttons.iter().take(7).enumerate() {
                report.buttons[i] = match btn.action_type {
                    ActionType::Special if btn.mapping_value >= 100 && btn.mapping_value < 200 => {
                        encode_media_action(btn.mapping_value).unwrap_or(0)
                    }
                    ActionType::Special if btn.mapping_value >= 200 => {
                        encode_fire_action(btn.mapping_value).unwrap_or(0)
                    }
                    _ => btn.mapping_value as u8,
                };
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

    #[test]
    fn media_and_fire_encoders_are_unresolved_stubs() {
        assert_eq!(encode_media_action(100), None);
        assert_eq!(encode_fire_action(200), None);
    }
}
