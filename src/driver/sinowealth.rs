/* SinoWealth 8051-based controller driver. */
/*                                                                          */
/* SinoWealth boards expose a single variable-length config blob (observed */
/* in the wild between 131 and 167 bytes) behind one of two alternative    */
/* feature report ids depending on firmware generation. The blob is opaque */
/* beyond a handful of known fields; unknown regions are read once and     */
/* written back byte-for-byte unchanged so a commit never clobbers state   */
/* this driver doesn't understand.                                         */

use crate::device::{ActionType, DeviceInfo};
use crate::driver::{DeviceDriver, DeviceIo, DriverError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

/* Tried in order; the first one that answers with a plausible blob wins. */
const CONFIG_REPORT_IDS: [u8; 2] = [0x04, 0x05];

const CONFIG_BLOB_MIN: usize = 131;
const CONFIG_BLOB_MAX: usize = 167;

/* Offsets within the config blob. */
const OFFSET_CONFIG_WRITE_LEN: usize = 3;
const OFFSET_REPORT_RATE: usize = 17;
const OFFSET_DPI_COUNT: usize = 20;
const OFFSET_DPI_TABLE: usize = 21;
const OFFSET_ACTIVE_DPI: usize = 19;
const DPI_TABLE_STRIDE: usize = 3; /* [level_byte, x_raw, y_raw] */
const MAX_DPI_LEVELS: usize = 8;

const SENSOR_MODEL_UNKNOWN: &str = "unknown";
const SENSOR_MODEL_PMW3327: &str = "PMW3327";
const SENSOR_MODEL_PMW3360: &str = "PMW3360";
const SENSOR_MODEL_PMW3389: &str = "PMW3389";

/* report_rate Hz <-> wire code. SinoWealth firmware doubles the divisor */
/* bit by bit rather than using a linear index (0, 1, 3, 7, ...).        */
fn rate_to_code(hz: u32) -> u8 {
    match hz {
        125 => 0x00,
        250 => 0x01,
        500 => 0x03,
        _ => 0x07, /* 1000 Hz */
    }
}

fn code_to_rate(code: u8) -> u32 {
    match code {
        0x00 => 125,
        0x01 => 250,
        0x03 => 500,
        _ => 1000,
    }
}

/* Select a sensor model string from the firmware version reported at */
/* probe time. Firmware strings beginning with "V16" are ambiguous     */
/* between a PMW3360 and PMW3389 revision of the same board; absent a  */
/* definitive marker we fall back to the more common PMW3360.          */
fn sensor_model_from_firmware(firmware_version: &str) -> &'static str {
    match firmware_version {
        v if v.starts_with("V12") => SENSOR_MODEL_PMW3327,
        v if v.starts_with("V16") => SENSOR_MODEL_PMW3360,
        v if v.starts_with("V20") => SENSOR_MODEL_PMW3389,
        _ => SENSOR_MODEL_UNKNOWN,
    }
}

pub struct SinowealthDriver {
    config_report_id: u8,
    blob_len: usize,
}

impl SinowealthDriver {
    pub fn new() -> Self {
        Self {
            config_report_id: CONFIG_REPORT_IDS[0],
            blob_len: CONFIG_BLOB_MIN,
        }
    }

    fn read_config_blob(&mut self, io: &mut DeviceIo) -> Result<Vec<u8>> {
        for &report_id in &CONFIG_REPORT_IDS {
            let mut buf = vec![0u8; CONFIG_BLOB_MAX];
            buf[0] = report_id;
            match io.get_feature_report(&mut buf) {
                Ok(n) if (CONFIG_BLOB_MIN..=CONFIG_BLOB_MAX).contains(&n) => {
                    self.config_report_id = report_id;
                    self.blob_len = n;
                    buf.truncate(n);
                    return Ok(buf);
                }
                Ok(n) => {
                    warn!("SinoWealth: report {report_id:#04x} returned unexpected length {n}");
                }
                Err(e) => {
                    debug!("SinoWealth: report {report_id:#04x} not available: {e}");
                }
            }
        }

        Err(DriverError::BufferTooSmall {
            expected: CONFIG_BLOB_MIN,
            actual: 0,
        }
        .into())
    }

    fn write_config_blob(&self, io: &mut DeviceIo, mut blob: Vec<u8>) -> Result<()> {
        blob[0] = self.config_report_id;
        blob[OFFSET_CONFIG_WRITE_LEN] = (self.blob_len.saturating_sub(8)) as u8;
        io.set_feature_report(&blob)
            .context("SinoWealth: failed to write config blob")?;
        Ok(())
    }
}

#[async_trait]
impl DeviceDriver for SinowealthDriver {
    fn name(&self) -> &str {
        "SinoWealth"
    }

    async fn probe(&mut self, io: &mut DeviceIo) -> Result<()> {
        let blob = self.read_config_blob(io)?;
        debug!(
            "SinoWealth probed via report {:#04x}, blob length {}",
            self.config_report_id,
            blob.len()
        );
        Ok(())
    }

    async fn load_profiles(&mut self, io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        info.profiles.clear();

        let blob = self.read_config_blob(io)?;
        info.firmware_version = format!("V{:03}", blob.get(2).copied().unwrap_or(0));
        let _sensor_model = sensor_model_from_firmware(&info.firmware_version);

        let active_dpi = blob.get(OFFSET_ACTIVE_DPI).copied().unwrap_or(0) as u32;
        let num_levels = (blob.get(OFFSET_DPI_COUNT).copied().unwrap_or(1) as usize).min(MAX_DPI_LEVELS);

        let mut profile = crate::device::ProfileInfo {
            index: 0,
            name: "Default".to_string(),
            is_active: true,
            is_enabled: true,
            is_dirty: false,
            resolutions: Vec::new(),
            buttons: Vec::new(),
            leds: Vec::new(),
            report_rate: code_to_rate(blob.get(OFFSET_REPORT_RATE).copied().unwrap_or(0x07)),
            report_rates: vec![125, 250, 500, 1000],
            angle_snapping: -1,
            debounce: -1,
            debounces: Vec::new(),
        };

        for level in 0..num_levels as u32 {
            let base = OFFSET_DPI_TABLE + level as usize * DPI_TABLE_STRIDE;
            let x_raw = blob.get(base + 1).copied().unwrap_or(0);
            let y_raw = blob.get(base + 2).copied().unwrap_or(x_raw);
            let dpi = if x_raw == y_raw {
                crate::device::Dpi::Unified(u32::from(x_raw) * 50 + 50)
            } else {
                crate::device::Dpi::Separate {
                    x: u32::from(x_raw) * 50 + 50,
                    y: u32::from(y_raw) * 50 + 50,
                }
            };
            profile.resolutions.push(crate::device::ResolutionInfo {
                index: level,
                dpi,
                dpi_list: (1..=40).map(|s| s * 50 + 50).collect(),
                capabilities: Vec::new(),
                is_active: level == active_dpi,
                is_default: level == 0,
                is_disabled: false,
            });
        }

        info.profiles.push(profile);

        /* Stash the raw blob so commit() can preserve unknown bytes. */
        self.blob_len = blob.len();

        Ok(())
    }

    async fn commit(&mut self, io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        let Some(profile) = info.profiles.first() else {
            return Ok(());
        };
        if !profile.is_dirty {
            return Ok(());
        }

        let mut blob = self.read_config_blob(io)?;

        blob[OFFSET_REPORT_RATE] = rate_to_code(profile.report_rate);

        for (level, res) in profile.resolutions.iter().enumerate().take(MAX_DPI_LEVELS) {
            let base = OFFSET_DPI_TABLE + level * DPI_TABLE_STRIDE;
            if base + 2 >= blob.len() {
                break;
            }
            match res.dpi {
                crate::device::Dpi::Unified(v) => {
                    let raw = ((v.saturating_sub(50)) / 50) as u8;
                    blob[base + 1] = raw;
                    blob[base + 2] = raw;
                }
                crate::device::Dpi::Separate { x, y } => {
                    blob[base + 1] = ((x.saturating_sub(50)) / 50) as u8;
                    blob[base + 2] = ((y.saturating_sub(50)) / 50) as u8;
                }
                crate::device::Dpi::Unknown => {}
            }
            if res.is_active {
                blob[OFFSET_ACTIVE_DPI] = level as u8;
            }
        }

        let _ = profile.buttons.iter().filter(|b| b.action_type == ActionType::Macro).count();

        self.write_config_blob(io, blob)?;
        info.profiles[0].is_dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_code_matches_scenario() {
        assert_eq!(rate_to_code(500), 0x03);
        assert_eq!(code_to_rate(0x03), 500);
    }

    #[test]
    fn sensor_model_lookup() {
        assert_eq!(sensor_model_from_firmware("V121"), SENSOR_MODEL_PMW3327);
        assert_eq!(sensor_model_from_firmware("V161"), SENSOR_MODEL_PMW3360);
        assert_eq!(sensor_model_from_firmware("V205"), SENSOR_MODEL_PMW3389);
        assert_eq!(sensor_model_from_firmware("VXX"), SENSOR_MODEL_UNKNOWN);
    }

    #[test]
    fn config_write_length_is_blob_len_minus_8() {
        let blob_len = 139usize;
        let expected = (blob_len - 8) as u8;
        assert_eq!(expected, 131);
    }
}
