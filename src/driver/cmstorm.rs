/* CM Storm driver: fixed-size per-profile report, static byte<->entity table. */
/* Same report family as Etekcity / Marsgaming / Logitech G600.               */

use crate::device::{ActionType, DeviceInfo};
use crate::driver::{DeviceDriver, DeviceIo};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

const CMSTORM_PROFILE_MAX: u32 = 4;
const CMSTORM_BUTTON_MAX: u32 = 7;
const CMSTORM_NUM_DPI: u32 = 5;

const CMSTORM_REPORT_ID_PROFILE: u8 = 0x02;
const CMSTORM_REPORT_SIZE: usize = 46;

#[derive(Clone, Copy)]
struct CmstormProfileReport {
    id: u8,
    profile_idx: u8,
    report_rate_code: u8,
    dpi_levels: [u8; 5],
    active_dpi: u8,
    buttons: [u8; 8],
}

impl CmstormProfileReport {
    fn new() -> Self {
        Self {
            id: CMSTORM_REPORT_ID_PROFILE,
            profile_idx: 0,
            report_rate_code: 0,
            dpi_levels: [0; 5],
            active_dpi: 0,
            buttons: [0; 8],
        }
    }

    fn into_bytes(self) -> [u8; CMSTORM_REPORT_SIZE] {
        let mut b = [0u8; CMSTORM_REPORT_SIZE];
        b[0] = self.id;
        b[1] = self.profile_idx;
        b[2] = self.report_rate_code;
        b[3..8].copy_from_slice(&self.dpi_levels);
        b[8] = self.active_dpi;
        b[9..17].copy_from_slice(&self.buttons);
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

pub struct CmstormDriver {}

impl CmstormDriver {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl DeviceDriver for CmstormDriver {
    fn name(&self) -> &str {
        "CM Storm"
    }

    async fn probe(&mut self, _io: &mut DeviceIo) -> Result<()> {
        debug!("Probe called for CM Storm");
        Ok(())
    }

    async fn load_profiles(&mut self, io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        info.profiles.clear();

        for profile_id in 0..CMSTORM_PROFILE_MAX {
            let mut buf = [0u8; CMSTORM_REPORT_SIZE];
            buf[0] = CMSTORM_REPORT_ID_PROFILE;
            buf[1] = profile_id as u8;
            let report = io
                .get_feature_report(&mut buf)
                .ok()
                .map(|_| buf)
                .unwrap_or_else(|| {
                    let mut b = CmstormProfileReport::new().into_bytes();
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

            for res_id in 0..CMSTORM_NUM_DPI {
                let raw = report[3 + res_id as usize];
                profile.resolutions.push(crate::device::ResolutionInfo {
                    index: res_id,
                    is_active: res_id as u8 == report[8],
                    is_default: res_id == 0,
                    is_disabled: false,
                    dpi: crate::device::Dpi::Unified(u32::from(raw) * 90 + 90),
                    dpi_list: (1..=40).map(|s| s * 90 + 90).collect(),
                    capabilities: Vec::new(),
                });
            }

            for btn_id in 0..=CMSTORM_BUTTON_MAX {
                let code = report.get(9 + btn_id as usize).copied().unwrap_or(0);
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

            let mut report = CmstormProfileReport::new();
            report.profile_idx = profile.index as u8;
            report.report_rate_code = rate_to_code(profile.report_rate);

            for (i, res) in profile.resolutions.iter().take(5).enumerate() {
                if let crate::device::Dpi::Unified(dpi) = res.dpi {
                    report.dpi_levels[i] = (dpi.saturating_sub(90) / 90) as u8;
                }
                if res.is_active {
                    report.active_dpi = i as u8;
                }
            }

            for (i, btn) in profile.buttons.iter().take(8).enumerate() {
                report.buttons[i] = btn.mapping_value as u8;
            }

            let b = report.into_bytes();
            io.write_report(&b).await?;
            profile.is_dirty = false;
        }
        Ok(())
    }
}
