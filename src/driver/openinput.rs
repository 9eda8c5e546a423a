/* openinput protocol driver. */
/*                                                                          */
/* Frames are `[report_id, page, function, data...]`. Short frames use     */
/* report id 0x20 (8 bytes total, 5 data bytes); long frames use report id */
/* 0x21 (32 bytes total, 29 data bytes). An error reply uses page 0xFF,    */
/* with `function` carrying the error kind.                                */

use crate::device::{ActionType, DeviceInfo};
use crate::driver::{DeviceDriver, DeviceIo, DriverError};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

const REPORT_ID_SHORT: u8 = 0x20;
const REPORT_ID_LONG: u8 = 0x21;
const SHORT_FRAME_LEN: usize = 8;
const LONG_FRAME_LEN: usize = 32;

const PAGE_ERROR: u8 = 0xFF;

const PAGE_GENERAL: u8 = 0x00;
const PAGE_PROFILE: u8 = 0x01;
const PAGE_BUTTON: u8 = 0x02;

const FUNC_GET_VERSION: u8 = 0x00;
const FUNC_GET_PROFILE: u8 = 0x01;
const FUNC_SET_PROFILE: u8 = 0x02;
const FUNC_GET_BUTTON: u8 = 0x01;
const FUNC_SET_BUTTON: u8 = 0x02;

const OPENINPUT_PROFILE_MAX: u32 = 4;
const OPENINPUT_BUTTON_MAX: u32 = 7;
const OPENINPUT_NUM_DPI: u32 = 4;

pub fn build_short_frame(page: u8, function: u8, data: [u8; 5]) -> [u8; SHORT_FRAME_LEN] {
    let mut buf = [0u8; SHORT_FRAME_LEN];
    buf[0] = REPORT_ID_SHORT;
    buf[1] = page;
    buf[2] = function;
    buf[3..8].copy_from_slice(&data);
    buf
}

#[allow(dead_code)]
pub fn build_long_frame(page: u8, function: u8, data: [u8; 29]) -> [u8; LONG_FRAME_LEN] {
    let mut buf = [0u8; LONG_FRAME_LEN];
    buf[0] = REPORT_ID_LONG;
    buf[1] = page;
    buf[2] = function;
    buf[3..32].copy_from_slice(&data);
    buf
}

fn check_error_frame(buf: &[u8]) -> Result<()> {
    if buf.len() >= 3 && buf[1] == PAGE_ERROR {
        return Err(DriverError::ProtocolError {
            sub_id: buf[1],
            error: buf[2],
        }
        .into());
    }
    Ok(())
}

pub struct OpenInputDriver {}

impl OpenInputDriver {
    pub fn new() -> Self {
        Self {}
    }

    async fn short_request(
        &self,
        io: &mut DeviceIo,
        page: u8,
        function: u8,
        data: [u8; 5],
    ) -> Result<[u8; SHORT_FRAME_LEN]> {
        let frame = build_short_frame(page, function, data);
        io.request(&frame, SHORT_FRAME_LEN, 3, move |buf| {
            if buf.len() < SHORT_FRAME_LEN || buf[1] != page {
                return None;
            }
            let mut out = [0u8; SHORT_FRAME_LEN];
            out.copy_from_slice(&buf[..SHORT_FRAME_LEN]);
            Some(out)
        })
        .await
        .and_then(|buf| {
            check_error_frame(&buf)?;
            Ok(buf)
        })
    }
}

#[async_trait]
impl DeviceDriver for OpenInputDriver {
    fn name(&self) -> &str {
        "openinput"
    }

    async fn probe(&mut self, io: &mut DeviceIo) -> Result<()> {
        let reply = self
            .short_request(io, PAGE_GENERAL, FUNC_GET_VERSION, [0; 5])
            .await?;
        debug!("openinput version byte = {:#04x}", reply[3]);
        Ok(())
    }

    async fn load_profiles(&mut self, io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        info.profiles.clear();

        for profile_id in 0..OPENINPUT_PROFILE_MAX {
            let mut data = [0u8; 5];
            data[0] = profile_id as u8;
            let reply = self
                .short_request(io, PAGE_PROFILE, FUNC_GET_PROFILE, data)
                .await
                .unwrap_or_else(|_| build_short_frame(PAGE_PROFILE, FUNC_GET_PROFILE, data));

            let mut profile = crate::device::ProfileInfo {
                index: profile_id,
                name: format!("Profile {}", profile_id),
                is_active: profile_id == 0,
                is_enabled: true,
                is_dirty: false,
                resolutions: Vec::new(),
                buttons: Vec::new(),
                leds: Vec::new(),
                report_rate: match reply[4] {
                    0 => 125,
                    1 => 250,
                    2 => 500,
                    _ => 1000,
                },
                report_rates: vec![125, 250, 500, 1000],
                angle_snapping: -1,
                debounce: -1,
                debounces: Vec::new(),
            };

            for res_id in 0..OPENINPUT_NUM_DPI {
                profile.resolutions.push(crate::device::ResolutionInfo {
                    index: res_id,
                    is_active: res_id == 0,
                    is_default: res_id == 0,
                    is_disabled: false,
                    dpi: crate::device::Dpi::Unified(u32::from(reply[3]) * 50 + 400),
                    dpi_list: (1..=40).map(|s| s * 50 + 400).collect(),
                    capabilities: Vec::new(),
                });
            }

            for btn_id in 0..=OPENINPUT_BUTTON_MAX {
                let mut bdata = [0u8; 5];
                bdata[0] = profile_id as u8;
                bdata[1] = btn_id as u8;
                let breply = self
                    .short_request(io, PAGE_BUTTON, FUNC_GET_BUTTON, bdata)
                    .await
                    .unwrap_or_else(|_| build_short_frame(PAGE_BUTTON, FUNC_GET_BUTTON, bdata));

                profile.buttons.push(crate::device::ButtonInfo {
                    index: btn_id,
                    action_type: ActionType::Button,
                    action_types: vec![0, 1, 2, 3, 4],
                    mapping_value: u32::from(breply[3]),
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

            let mut data = [0u8; 5];
            data[0] = profile.index as u8;
            data[4] = match profile.report_rate {
                125 => 0,
                250 => 1,
                500 => 2,
                _ => 3,
            };
            self.short_request(io, PAGE_PROFILE, FUNC_SET_PROFILE, data)
                .await?;

            for btn in &profile.buttons {
                let mut bdata = [0u8; 5];
                bdata[0] = profile.index as u8;
                bdata[1] = btn.index as u8;
                bdata[2] = btn.mapping_value as u8;
                self.short_request(io, PAGE_BUTTON, FUNC_SET_BUTTON, bdata)
                    .await?;
            }

            profile.is_dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_frame_layout() {
        let frame = build_short_frame(PAGE_PROFILE, FUNC_GET_PROFILE, [1, 2, 3, 4, 5]);
        assert_eq!(frame[0], REPORT_ID_SHORT);
        assert_eq!(frame[1], PAGE_PROFILE);
        assert_eq!(frame[2], FUNC_GET_PROFILE);
        assert_eq!(&frame[3..8], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn error_frame_detected_by_page() {
        let buf = [REPORT_ID_SHORT, PAGE_ERROR, 0x07, 0, 0, 0, 0, 0];
        assert!(check_error_frame(&buf).is_err());
    }
}
