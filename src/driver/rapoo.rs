/* Rapoo driver: single report id (0xBA), request/response with a status byte */
/* that the device flips from "wait" to "success" while it commits to flash. */

use crate::device::{ActionType, DeviceInfo};
use crate::driver::{DeviceDriver, DeviceIo, DriverError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

const RAPOO_REPORT_ID: u8 = 0xBA;
const RAPOO_REPORT_SIZE: usize = 32;

const RAPOO_STATUS_SUCCESS: u8 = 0x01;
const RAPOO_STATUS_WAIT: u8 = 0x02;

const RAPOO_POLL_ATTEMPTS: u32 = 20;
const RAPOO_POLL_SPACING_MS: u64 = 100;

const RAPOO_CMD_GET_PROFILE: u8 = 0x01;
const RAPOO_CMD_SET_PROFILE: u8 = 0x02;

const RAPOO_PROFILE_MAX: u32 = 2;
const RAPOO_BUTTON_MAX: u32 = 5;
const RAPOO_NUM_DPI: u32 = 4;

pub struct RapooDriver {}

impl RapooDriver {
    pub fn new() -> Self {
        Self {}
    }

    /* Send a command and poll the status byte (offset 1) until it settles */
    /* on success, up to `RAPOO_POLL_ATTEMPTS` tries at 100 ms spacing.     */
    async fn send_and_wait(&self, io: &mut DeviceIo, mut report: [u8; RAPOO_REPORT_SIZE]) -> Result<[u8; RAPOO_REPORT_SIZE]> {
        report[0] = RAPOO_REPORT_ID;
        io.write_report(&report)
            .await
            .context("Rapoo: write failed")?;

        for _ in 0..RAPOO_POLL_ATTEMPTS {
            let mut buf = [0u8; RAPOO_REPORT_SIZE];
            match tokio::time::timeout(
                std::time::Duration::from_millis(RAPOO_POLL_SPACING_MS),
                io.read_report(&mut buf),
            )
            .await
            {
                Ok(Ok(_)) => match buf[1] {
                    RAPOO_STATUS_SUCCESS => return Ok(buf),
                    RAPOO_STATUS_WAIT => {
                        tokio::time::sleep(std::time::Duration::from_millis(RAPOO_POLL_SPACING_MS)).await;
                        continue;
                    }
                    other => {
                        return Err(DriverError::ProtocolError {
                            sub_id: report[2],
                            error: other,
                        }
                        .into())
                    }
                },
                _ => {
                    tokio::time::sleep(std::time::Duration::from_millis(RAPOO_POLL_SPACING_MS)).await;
                    continue;
                }
            }
        }

        Err(DriverError::Timeout {
            attempts: RAPOO_POLL_ATTEMPTS as u8,
        }
        .into())
    }
}

#[async_trait]
impl DeviceDriver for RapooDriver {
    fn name(&self) -> &str {
        "Rapoo"
    }

    async fn probe(&mut self, io: &mut DeviceIo) -> Result<()> {
        let mut req = [0u8; RAPOO_REPORT_SIZE];
        req[2] = RAPOO_CMD_GET_PROFILE;
        let reply = self.send_and_wait(io, req).await?;
        debug!("Rapoo probed, first profile byte = {:#04x}", reply[3]);
        Ok(())
    }

    async fn load_profiles(&mut self, io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        info.profiles.clear();

        for profile_id in 0..=RAPOO_PROFILE_MAX {
            let mut req = [0u8; RAPOO_REPORT_SIZE];
            req[2] = RAPOO_CMD_GET_PROFILE;
            req[3] = profile_id as u8;

            let report = self.send_and_wait(io, req).await.unwrap_or(req);

            let mut profile = crate::device::ProfileInfo {
                index: profile_id,
                name: format!("Profile {}", profile_id),
                is_active: profile_id == 0,
                is_enabled: true,
                is_dirty: false,
                resolutions: Vec::new(),
                buttons: Vec::new(),
                leds: Vec::new(),
                report_rate: 500,
                report_rates: vec![125, 250, 500, 1000],
                angle_snapping: -1,
                debounce: -1,
                debounces: Vec::new(),
            };

            for res_id in 0..RAPOO_NUM_DPI {
                let raw = report.get(4 + res_id as usize).copied().unwrap_or(0);
                profile.resolutions.push(crate::device::ResolutionInfo {
                    index: res_id,
                    is_active: res_id == 0,
                    is_default: res_id == 0,
                    is_disabled: false,
                    dpi: crate::device::Dpi::Unified(u32::from(raw) * 100 + 500),
                    dpi_list: (1..=32).map(|s| s * 100 + 500).collect(),
                    capabilities: Vec::new(),
                });
            }

            for btn_id in 0..=RAPOO_BUTTON_MAX {
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

            let mut req = [0u8; RAPOO_REPORT_SIZE];
            req[2] = RAPOO_CMD_SET_PROFILE;
            req[3] = profile.index as u8;

            for (i, res) in profile.resolutions.iter().take(4).enumerate() {
                if let crate::device::Dpi::Unified(dpi) = res.dpi {
                    req[4 + i] = (dpi.saturating_sub(500) / 100) as u8;
                }
            }

            for (i, btn) in profile.buttons.iter().take(6).enumerate() {
                req[8 + i] = btn.mapping_value as u8;
            }

            self.send_and_wait(io, req).await?;
            profile.is_dirty = false;
        }
        Ok(())
    }
}
