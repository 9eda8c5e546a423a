/* Logitech HID++ 2.0 driver implementation. */
/*  */
/* HID++ 2.0 is the modern feature-based protocol used by most current */
/* Logitech gaming mice. Each capability is exposed as a numbered "feature" */
/* that must be discovered at probe time via the Root feature (0x0000). */

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::device::{Color, DeviceInfo, Dpi, LedMode, ProfileInfo, RgbColor};
use crate::driver::{DeviceIo, DriverError};

use super::hidpp::{
    self, HidppReport, DEVICE_IDX_WIRED, LED_HW_MODE_BREATHING, LED_HW_MODE_COLOR_WAVE,
    LED_HW_MODE_CYCLE, LED_HW_MODE_FIXED, LED_HW_MODE_OFF, LED_HW_MODE_STARLIGHT,
    LED_PAYLOAD_SIZE, PAGE_ADJUSTABLE_DPI, PAGE_ADJUSTABLE_REPORT_RATE,
    PAGE_COLOR_LED_EFFECTS, PAGE_DEVICE_NAME, PAGE_ONBOARD_PROFILES, PAGE_RGB_EFFECTS,
    PAGE_SPECIAL_KEYS_BUTTONS, ROOT_FEATURE_INDEX, ROOT_FN_GET_FEATURE,
    ROOT_FN_GET_PROTOCOL_VERSION,
};

/* Software ID used in all our requests (arbitrary, identifies us) */
const SW_ID: u8 = 0x04;

/* Adjustable DPI (0x2201) function IDs */
const DPI_FN_GET_SENSOR_COUNT: u8 = 0x00;
const DPI_FN_GET_SENSOR_DPI: u8 = 0x01;

/* Adjustable Report Rate (0x8060) function IDs */
const RATE_FN_GET_REPORT_RATE_LIST: u8 = 0x00;
const RATE_FN_GET_REPORT_RATE: u8 = 0x01;

/* Color LED Effects (0x8070) function IDs */
const LED_FN_GET_ZONE_EFFECT: u8 = 0x01;
const LED_FN_SET_ZONE_EFFECT: u8 = 0x02;

/* Onboard Profiles (0x8100) function IDs */
const ONBOARD_FN_SELECT_PROFILE: u8 = 0x01;
const ONBOARD_FN_MEM_READ: u8 = 0x03;
const ONBOARD_FN_MEM_WRITE: u8 = 0x05;
const ONBOARD_FN_SET_ACTIVE_PROFILE: u8 = 0x07;

/* The on-flash profile record is read/written 16 bytes at a time via MEM_READ;
 * MEM_WRITE trades 1 header byte for payload, so its chunks are one byte
 * shorter. Layout, all bit-exact round-trip aside from the fields below: */
const ONBOARD_BLOB_SIZE: usize = 32;
const ONBOARD_READ_CHUNK: usize = 16;
const ONBOARD_WRITE_CHUNK: usize = 15;
const ONBOARD_NAME_RANGE: std::ops::Range<usize> = 0..16;
const ONBOARD_DPI_OFFSET: usize = 16;
const ONBOARD_LED_MODE_OFFSET: usize = 20;
const ONBOARD_LED_COLOR_RANGE: std::ops::Range<usize> = 21..24;
const ONBOARD_CRC_OFFSET: usize = 30;

/* A cached on-flash profile record. Bytes outside the name/DPI/LED ranges
 * (24..30) are never interpreted, only preserved, so a profile using fields
 * this driver doesn't model yet still round-trips untouched. */
#[derive(Debug, Clone, Copy)]
struct OnboardProfileBlob([u8; ONBOARD_BLOB_SIZE]);

impl OnboardProfileBlob {
    fn crc(&self) -> u16 {
        hidpp::crc_ccitt(&self.0[..ONBOARD_CRC_OFFSET])
    }

    fn stored_crc(&self) -> u16 {
        u16::from_le_bytes([self.0[ONBOARD_CRC_OFFSET], self.0[ONBOARD_CRC_OFFSET + 1]])
    }

    fn validate(&self) -> Result<()> {
        let computed = self.crc();
        let received = self.stored_crc();
        if computed != received {
            return Err(DriverError::ChecksumMismatch { computed, received }.into());
        }
        Ok(())
    }

    fn name(&self) -> String {
        let bytes = &self.0[ONBOARD_NAME_RANGE];
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    fn dpi(&self) -> u16 {
        u16::from_le_bytes([self.0[ONBOARD_DPI_OFFSET], self.0[ONBOARD_DPI_OFFSET + 1]])
    }

    fn led_mode_byte(&self) -> u8 {
        self.0[ONBOARD_LED_MODE_OFFSET]
    }

    fn led_color(&self) -> RgbColor {
        let c = &self.0[ONBOARD_LED_COLOR_RANGE];
        RgbColor { r: c[0], g: c[1], b: c[2] }
    }

    /* Apply the uniform profile's name/DPI/LED fields onto this cached blob
     * and recompute the trailing CRC. Everything else (buttons, macros,
     * reserved bytes) is left exactly as last read from the device. */
    fn apply(&mut self, profile: &ProfileInfo) {
        let mut name_bytes = [0u8; 16];
        let src = profile.name.as_bytes();
        let len = src.len().min(name_bytes.len());
        name_bytes[..len].copy_from_slice(&src[..len]);
        self.0[ONBOARD_NAME_RANGE].copy_from_slice(&name_bytes);

        if let Some(res) = profile.resolutions.iter().find(|r| r.is_active)
            && let Dpi::Unified(dpi) = res.dpi
        {
            self.0[ONBOARD_DPI_OFFSET..ONBOARD_DPI_OFFSET + 2]
                .copy_from_slice(&(dpi as u16).to_le_bytes());
        }

        if let Some(led) = profile.leds.first() {
            let mode_byte = match led.mode {
                LedMode::Off => LED_HW_MODE_OFF,
                LedMode::Solid | LedMode::TriColor => LED_HW_MODE_FIXED,
                LedMode::Cycle => LED_HW_MODE_CYCLE,
                LedMode::ColorWave => LED_HW_MODE_COLOR_WAVE,
                LedMode::Starlight => LED_HW_MODE_STARLIGHT,
                LedMode::Breathing => LED_HW_MODE_BREATHING,
            };
            self.0[ONBOARD_LED_MODE_OFFSET] = mode_byte;
            let rgb = led.color.to_rgb();
            self.0[ONBOARD_LED_COLOR_RANGE].copy_from_slice(&[rgb.r, rgb.g, rgb.b]);
        }

        let crc = self.crc();
        self.0[ONBOARD_CRC_OFFSET..ONBOARD_CRC_OFFSET + 2].copy_from_slice(&crc.to_le_bytes());
    }
}

/* A feature page → runtime index mapping for a known set of capabilities. */
#[derive(Debug, Default)]
struct FeatureMap {
    adjustable_dpi: Option<u8>,
    special_keys: Option<u8>,
    onboard_profiles: Option<u8>,
    color_led_effects: Option<u8>,
    rgb_effects: Option<u8>,
    report_rate: Option<u8>,
    device_name: Option<u8>,
}

impl FeatureMap {
    /* Store a discovered feature index based on its page ID. */
    fn insert(&mut self, page: u16, index: u8) {
        match page {
            PAGE_ADJUSTABLE_DPI => self.adjustable_dpi = Some(index),
            PAGE_SPECIAL_KEYS_BUTTONS => self.special_keys = Some(index),
            PAGE_ONBOARD_PROFILES => self.onboard_profiles = Some(index),
            PAGE_COLOR_LED_EFFECTS => self.color_led_effects = Some(index),
            PAGE_RGB_EFFECTS => self.rgb_effects = Some(index),
            PAGE_ADJUSTABLE_REPORT_RATE => self.report_rate = Some(index),
            PAGE_DEVICE_NAME => self.device_name = Some(index),
            _ => {}
        }
    }
}

/* Protocol version stored after a successful probe. */
#[derive(Debug, Clone, Copy, Default)]
struct ProtocolVersion {
    #[allow(dead_code)]
    major: u8,
    #[allow(dead_code)]
    minor: u8,
}

pub struct Hidpp20Driver {
    device_index: u8,
    version: ProtocolVersion,
    features: FeatureMap,
    onboard_blobs: HashMap<u32, OnboardProfileBlob>,
}

impl Hidpp20Driver {
    pub fn new() -> Self {
        Self {
            device_index: DEVICE_IDX_WIRED,
            version: ProtocolVersion::default(),
            features: FeatureMap::default(),
            onboard_blobs: HashMap::new(),
        }
    }

    /* Query the Root feature (0x0000, fn 0) to find the runtime index of */
    /* a given feature page. Returns `None` if the device does not support it. */
    async fn get_feature_index(
        &self,
        io: &mut DeviceIo,
        feature_page: u16,
    ) -> Result<Option<u8>> {
        let [hi, lo] = feature_page.to_be_bytes();

        let request = hidpp::build_hidpp20_request(
            self.device_index,
            ROOT_FEATURE_INDEX,
            ROOT_FN_GET_FEATURE,
            SW_ID,
            &[hi, lo],
        );

        let dev_idx = self.device_index;
        io.request(&request, 20, 3, move |buf| {
            let report = HidppReport::parse(buf)?;
            if report.is_error() {
                return Some(None);
            }
            if !report.matches_hidpp20(dev_idx, ROOT_FEATURE_INDEX) {
                return None;
            }
            if let HidppReport::Long { params, .. } = report {
                let index = params[0];
                Some(if index == 0 { None } else { Some(index) })
            } else {
                None
            }
        })
        .await
        .with_context(|| format!("Feature lookup for 0x{feature_page:04X} failed"))
    }

    /* Send a HID++ 2.0 feature request and return the 16-byte response payload. */
    async fn feature_request(
        &self,
        io: &mut DeviceIo,
        feature_index: u8,
        function: u8,
        params: &[u8],
    ) -> Result<[u8; 16]> {
        let request = hidpp::build_hidpp20_request(
            self.device_index,
            feature_index,
            function,
            SW_ID,
            params,
        );

        let dev_idx = self.device_index;
        io.request(&request, 20, 3, move |buf| {
            let report = HidppReport::parse(buf)?;
            if report.matches_hidpp20(dev_idx, feature_index)
                && let HidppReport::Long { params, .. } = report
            {
                return Some(params);
            }
            None
        })
        .await
        .with_context(|| {
            format!("Feature request (idx=0x{feature_index:02X}, fn={function}) failed")
        })
    }

    /* Discover all supported features and cache their runtime indices. */
    async fn discover_features(&mut self, io: &mut DeviceIo) -> Result<()> {
        const FEATURE_QUERIES: &[(u16, &str)] = &[
            (PAGE_ADJUSTABLE_DPI, "Adjustable DPI"),
            (PAGE_SPECIAL_KEYS_BUTTONS, "Special Keys/Buttons"),
            (PAGE_ONBOARD_PROFILES, "Onboard Profiles"),
            (PAGE_COLOR_LED_EFFECTS, "Color LED Effects"),
            (PAGE_RGB_EFFECTS, "RGB Effects"),
            (PAGE_ADJUSTABLE_REPORT_RATE, "Adjustable Report Rate"),
            (PAGE_DEVICE_NAME, "Device Name"),
        ];

        for &(page, name) in FEATURE_QUERIES {
            match self.get_feature_index(io, page).await {
                Ok(Some(idx)) => {
                    debug!("  Feature {name} (0x{page:04X}) at index 0x{idx:02X}");
                    self.features.insert(page, idx);
                }
                Ok(None) => {
                    debug!("  Feature {name} (0x{page:04X}) not supported");
                }
                Err(e) => {
                    warn!("  Feature {name} (0x{page:04X}) query failed: {e}");
                }
            }
        }

        Ok(())
    }

    /* Read DPI sensor information using feature 0x2201. */
    async fn read_dpi_info(
        &self,
        io: &mut DeviceIo,
        profile: &mut ProfileInfo,
    ) -> Result<()> {
        let Some(idx) = self.features.adjustable_dpi else {
            return Ok(());
        };

        let sensor_info = self
            .feature_request(io, idx, DPI_FN_GET_SENSOR_COUNT, &[0])
            .await?;
        if sensor_info[0] == 0 {
            return Ok(());
        }

        let dpi_data = self
            .feature_request(io, idx, DPI_FN_GET_SENSOR_DPI, &[0])
            .await?;
        let current_dpi = u16::from_be_bytes([dpi_data[1], dpi_data[2]]);
        let default_dpi = u16::from_be_bytes([dpi_data[3], dpi_data[4]]);

        if let Some(res) = profile.resolutions.first_mut() {
            res.dpi = Dpi::Unified(u32::from(current_dpi));
        }

        debug!("HID++ 2.0: sensor 0 DPI = {current_dpi} (default = {default_dpi})");
        Ok(())
    }

    /* Read report rate using feature 0x8060. */
    async fn read_report_rate(
        &self,
        io: &mut DeviceIo,
        profile: &mut ProfileInfo,
    ) -> Result<()> {
        let Some(idx) = self.features.report_rate else {
            return Ok(());
        };

        let list_data = self
            .feature_request(io, idx, RATE_FN_GET_REPORT_RATE_LIST, &[])
            .await?;
        let rate_bitmap = list_data[0];

        profile.report_rates = (0..8u32)
            .filter(|bit| rate_bitmap & (1 << bit) != 0)
            .map(|bit| 1000 / (bit + 1))
            .collect();

        let rate_data = self
            .feature_request(io, idx, RATE_FN_GET_REPORT_RATE, &[])
            .await?;
        let current_rate_ms = u32::from(rate_data[0]);
        if current_rate_ms > 0 {
            profile.report_rate = 1000 / current_rate_ms;
        }
        Ok(())
    }

    /* Read LED zone effect from the device using feature 0x8070. */
    async fn read_led_info(
        &self,
        io: &mut DeviceIo,
        profile: &mut ProfileInfo,
    ) -> Result<()> {
        let Some(idx) = self.features.color_led_effects else {
            return Ok(());
        };

        for led in &mut profile.leds {
            let zone_index = led.index as u8;
            let response = self
                .feature_request(io, idx, LED_FN_GET_ZONE_EFFECT, &[zone_index])
                .await?;

            /* response[0] = zone_index echo */
            /* response[1..12] = hidpp20_internal_led (11 bytes) */
            if response[0] != zone_index {
                warn!("LED read: zone mismatch (expected {zone_index}, got {})", response[0]);
                continue;
            }

            let payload = &response[1..1 + LED_PAYLOAD_SIZE];
            let mode_byte = payload[0];

            match mode_byte {
                LED_HW_MODE_OFF => {
                    led.mode = LedMode::Off;
                }
                LED_HW_MODE_FIXED => {
                    led.mode = LedMode::Solid;
                    led.color = Color::from_rgb(RgbColor {
                        r: payload[1],
                        g: payload[2],
                        b: payload[3],
                    });
                }
                LED_HW_MODE_CYCLE => {
                    led.mode = LedMode::Cycle;
                    led.effect_duration =
                        u32::from(u16::from_be_bytes([payload[6], payload[7]]));
                    led.brightness = u32::from(payload[8]) * 255 / 100;
                }
                LED_HW_MODE_COLOR_WAVE => {
                    led.mode = LedMode::ColorWave;
                    led.effect_duration =
                        u32::from(u16::from_be_bytes([payload[6], payload[7]]));
                    led.brightness = u32::from(payload[8]) * 255 / 100;
                }
                LED_HW_MODE_STARLIGHT => {
                    led.mode = LedMode::Starlight;
                    led.color = Color::from_rgb(RgbColor {
                        r: payload[1],
                        g: payload[2],
                        b: payload[3],
                    });
                    led.secondary_color = Color::from_rgb(RgbColor {
                        r: payload[4],
                        g: payload[5],
                        b: payload[6],
                    });
                }
                LED_HW_MODE_BREATHING => {
                    led.mode = LedMode::Breathing;
                    led.color = Color::from_rgb(RgbColor {
                        r: payload[1],
                        g: payload[2],
                        b: payload[3],
                    });
                    led.effect_duration =
                        u32::from(u16::from_be_bytes([payload[4], payload[5]]));
                    led.brightness = u32::from(payload[7]) * 255 / 100;
                }
                _ => {
                    debug!("LED zone {zone_index}: unknown mode 0x{mode_byte:02X}");
                }
            }

            debug!("LED zone {zone_index}: mode={:?}", led.mode);
        }

        Ok(())
    }

    /* Write LED zone effect to the device using feature 0x8070. */
    /* TriColor mode is routed through feature 0x8071 (RGB Effects) instead. */
    async fn write_led_info(
        &self,
        io: &mut DeviceIo,
        profile: &ProfileInfo,
    ) -> Result<()> {
        for led in &profile.leds {
            let zone_index = led.index as u8;

            if led.mode == LedMode::TriColor {
                /* TriColor uses 0x8071 RGB Effects with the multi-LED cluster pattern command. */
                let Some(idx) = self.features.rgb_effects else {
                    warn!("TriColor requested but device lacks RGB Effects (0x8071)");
                    continue;
                };
                let led_payload = hidpp::build_led_payload(led);

                /* Multi-LED pattern: [zone_index, ...payload..., 0x01 (persist)] */
                let mut params = [0u8; 13];
                params[0] = zone_index;
                params[1..12].copy_from_slice(&led_payload);
                params[12] = 0x01;

                /* Function 0x02 = setMultiLEDRGBClusterPattern on 0x8071 */
                self.feature_request(io, idx, 0x02, &params)
                    .await
                    .context("Failed to write TriColor multi-LED cluster pattern")?;
            } else {
                let Some(idx) = self.features.color_led_effects else {
                    warn!("Device lacks Color LED Effects (0x8070)");
                    continue;
                };
                let led_payload = hidpp::build_led_payload(led);

                /* Param layout: [zone_index, ...11-byte payload..., 0x01 (persist to flash)] */
                let mut params = [0u8; 13];
                params[0] = zone_index;
                params[1..12].copy_from_slice(&led_payload);
                params[12] = 0x01;

                self.feature_request(io, idx, LED_FN_SET_ZONE_EFFECT, &params)
                    .await
                    .context("Failed to write LED zone effect")?;
            }

            debug!("HID++ 2.0: committed LED zone {zone_index} mode={:?}", led.mode);
        }

        Ok(())
    }

    /* Write DPI sensor information using feature 0x2201. */
    async fn write_dpi_info(
        &self,
        io: &mut DeviceIo,
        profile: &ProfileInfo,
    ) -> Result<()> {
        const DPI_FN_SET_SENSOR_DPI: u8 = 0x02;

        let Some(idx) = self.features.adjustable_dpi else {
            return Ok(());
        };

        if let Some(res) = profile.resolutions.iter().find(|r| r.is_active)
            && let Dpi::Unified(dpi_val) = res.dpi
        {
            let bytes = (dpi_val as u16).to_be_bytes();
            /* Param layout: sensor (1 byte), DPI uint16 (2 bytes) */
            self.feature_request(io, idx, DPI_FN_SET_SENSOR_DPI, &[0, bytes[0], bytes[1]])
                .await
                .context("Failed to write DPI")?;
            debug!("HID++ 2.0: committed DPI = {}", dpi_val);
        }
        Ok(())
    }

    /* Write report rate using feature 0x8060. */
    async fn write_report_rate(
        &self,
        io: &mut DeviceIo,
        profile: &ProfileInfo,
    ) -> Result<()> {
        const RATE_FN_SET_REPORT_RATE: u8 = 0x02;

        let Some(idx) = self.features.report_rate else {
            return Ok(());
        };

        if profile.report_rate > 0 {
            let rate_ms = (1000 / profile.report_rate) as u8;
            self.feature_request(io, idx, RATE_FN_SET_REPORT_RATE, &[rate_ms])
                .await
                .context("Failed to write report rate")?;
            debug!("HID++ 2.0: committed report rate = {} Hz", profile.report_rate);
        }
        Ok(())
    }

    /* Tell the device which profile index subsequent MEM_READ/MEM_WRITE calls */
    /* address, per the onboard-profile workflow in the feature documentation. */
    async fn select_onboard_profile(
        &self,
        io: &mut DeviceIo,
        idx: u8,
        profile_index: u8,
    ) -> Result<()> {
        self.feature_request(io, idx, ONBOARD_FN_SELECT_PROFILE, &[profile_index])
            .await
            .with_context(|| format!("Failed to select onboard profile {profile_index}"))?;
        Ok(())
    }

    /* Read a profile's full on-flash blob and validate its trailing CRC. */
    async fn read_onboard_blob(
        &self,
        io: &mut DeviceIo,
        idx: u8,
        profile_index: u8,
    ) -> Result<OnboardProfileBlob> {
        self.select_onboard_profile(io, idx, profile_index).await?;

        let mut raw = [0u8; ONBOARD_BLOB_SIZE];
        let mut offset = 0usize;
        while offset < ONBOARD_BLOB_SIZE {
            let chunk = self
                .feature_request(io, idx, ONBOARD_FN_MEM_READ, &[offset as u8])
                .await
                .with_context(|| {
                    format!("Onboard profile {profile_index} read at offset {offset} failed")
                })?;
            let len = ONBOARD_READ_CHUNK.min(ONBOARD_BLOB_SIZE - offset);
            raw[offset..offset + len].copy_from_slice(&chunk[..len]);
            offset += len;
        }

        let blob = OnboardProfileBlob(raw);
        blob.validate()
            .with_context(|| format!("Onboard profile {profile_index} blob"))?;
        Ok(blob)
    }

    /* Write a profile's full on-flash blob back, chunked to fit the */
    /* 16-byte feature request payload (1 header byte + 15 data bytes). */
    async fn write_onboard_blob(
        &self,
        io: &mut DeviceIo,
        idx: u8,
        profile_index: u8,
        blob: &OnboardProfileBlob,
    ) -> Result<()> {
        self.select_onboard_profile(io, idx, profile_index).await?;

        let mut offset = 0usize;
        while offset < ONBOARD_BLOB_SIZE {
            let len = ONBOARD_WRITE_CHUNK.min(ONBOARD_BLOB_SIZE - offset);
            let mut params = Vec::with_capacity(1 + len);
            params.push(offset as u8);
            params.extend_from_slice(&blob.0[offset..offset + len]);
            self.feature_request(io, idx, ONBOARD_FN_MEM_WRITE, &params)
                .await
                .with_context(|| {
                    format!("Onboard profile {profile_index} write at offset {offset} failed")
                })?;
            offset += len;
        }
        Ok(())
    }

    /* Read every profile's onboard blob, cache it, and overlay its name/DPI/LED */
    /* fields onto the uniform model. Per-feature reads (DPI/rate/LED) still run */
    /* afterward and take precedence for the active profile's live sensor state. */
    async fn load_onboard_profiles(
        &mut self,
        io: &mut DeviceIo,
        info: &mut DeviceInfo,
    ) -> Result<()> {
        let Some(idx) = self.features.onboard_profiles else {
            return Ok(());
        };

        for profile in &mut info.profiles {
            let profile_index = profile.index as u8;
            let blob = match self.read_onboard_blob(io, idx, profile_index).await {
                Ok(blob) => blob,
                Err(e) => {
                    warn!("Failed to read onboard profile {profile_index}: {e:#}");
                    continue;
                }
            };

            let name = blob.name();
            if !name.is_empty() {
                profile.name = name;
            }
            if let Some(res) = profile.resolutions.iter_mut().find(|r| r.is_active) {
                res.dpi = Dpi::Unified(u32::from(blob.dpi()));
            }
            if let Some(led) = profile.leds.first_mut() {
                let rgb = blob.led_color();
                led.color = Color::from_rgb(rgb);
                led.mode = match blob.led_mode_byte() {
                    LED_HW_MODE_OFF => LedMode::Off,
                    LED_HW_MODE_CYCLE => LedMode::Cycle,
                    LED_HW_MODE_COLOR_WAVE => LedMode::ColorWave,
                    LED_HW_MODE_STARLIGHT => LedMode::Starlight,
                    LED_HW_MODE_BREATHING => LedMode::Breathing,
                    LED_HW_MODE_FIXED => LedMode::Solid,
                    _ => led.mode,
                };
            }

            self.onboard_blobs.insert(profile.index, blob);
        }

        Ok(())
    }

    /* Re-encode and write back every dirty profile's onboard blob, bit-exact */
    /* aside from the name/DPI/LED fields this driver actually changes, then set */
    /* the active profile on the device if it changed. */
    async fn commit_onboard_profiles(
        &mut self,
        io: &mut DeviceIo,
        info: &mut DeviceInfo,
    ) -> Result<()> {
        let Some(idx) = self.features.onboard_profiles else {
            return Ok(());
        };

        for profile in &mut info.profiles {
            if !profile.is_dirty {
                continue;
            }
            let profile_index = profile.index as u8;

            let mut blob = match self.onboard_blobs.get(&profile.index).copied() {
                Some(blob) => blob,
                None => self.read_onboard_blob(io, idx, profile_index).await?,
            };

            blob.apply(profile);
            self.write_onboard_blob(io, idx, profile_index, &blob).await?;
            self.onboard_blobs.insert(profile.index, blob);
            profile.is_dirty = false;

            if profile.is_active {
                self.feature_request(
                    io,
                    idx,
                    ONBOARD_FN_SET_ACTIVE_PROFILE,
                    &[profile_index],
                )
                .await
                .with_context(|| format!("Failed to activate onboard profile {profile_index}"))?;
            }

            debug!("HID++ 2.0: committed onboard profile {profile_index} blob");
        }

        Ok(())
    }
}

#[async_trait]
impl super::DeviceDriver for Hidpp20Driver {
    fn name(&self) -> &str {
        "Logitech HID++ 2.0"
    }

    async fn probe(&mut self, io: &mut DeviceIo) -> Result<()> {
        let request = hidpp::build_hidpp20_request(
            self.device_index,
            ROOT_FEATURE_INDEX,
            ROOT_FN_GET_PROTOCOL_VERSION,
            SW_ID,
            &[],
        );

        let dev_idx = self.device_index;
        let (major, minor) = io
            .request(&request, 20, 3, move |buf| {
                let report = HidppReport::parse(buf)?;
                if report.is_error() {
                    return None;
                }
                if !report.matches_hidpp20(dev_idx, ROOT_FEATURE_INDEX) {
                    return None;
                }
                if let HidppReport::Long { params, .. } = report {
                    Some((params[0], params[1]))
                } else {
                    None
                }
            })
            .await
            .context("HID++ 2.0 protocol version probe failed")?;

        self.version = ProtocolVersion { major, minor };
        info!("HID++ 2.0 device detected (protocol {major}.{minor})");

        self.discover_features(io).await?;
        Ok(())
    }

    async fn load_profiles(
        &mut self,
        io: &mut DeviceIo,
        info: &mut DeviceInfo,
    ) -> Result<()> {
        self.load_onboard_profiles(io, info).await?;

        for profile in &mut info.profiles {
            if let Err(e) = self.read_dpi_info(io, profile).await {
                warn!("Failed to read DPI for profile {}: {e}", profile.index);
            }
            if let Err(e) = self.read_report_rate(io, profile).await {
                warn!("Failed to read report rate for profile {}: {e}", profile.index);
            }
            if let Err(e) = self.read_led_info(io, profile).await {
                warn!("Failed to read LEDs for profile {}: {e}", profile.index);
            }
        }

        debug!("HID++ 2.0: loaded {} profiles", info.profiles.len());
        Ok(())
    }

    async fn commit(&mut self, io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        if let Err(e) = self.commit_onboard_profiles(io, info).await {
            warn!("Failed to commit onboard profiles: {e:#}");
        }

        if let Some(profile) = info.profiles.iter().find(|p| p.is_active) {
            if let Err(e) = self.write_dpi_info(io, profile).await {
                warn!("Failed to commit DPI for profile {}: {e:#}", profile.index);
            }
            if let Err(e) = self.write_report_rate(io, profile).await {
                warn!("Failed to commit report rate for profile {}: {e:#}", profile.index);
            }
            if let Err(e) = self.write_led_info(io, profile).await {
                warn!("Failed to commit LEDs for profile {}: {e:#}", profile.index);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Dpi, LedInfo, ProfileInfo, ResolutionInfo};

    fn sample_profile() -> ProfileInfo {
        ProfileInfo {
            index: 0,
            name: "Old Name".into(),
            is_active: true,
            is_enabled: true,
            is_dirty: true,
            report_rate: 1000,
            report_rates: vec![1000],
            angle_snapping: -1,
            debounce: -1,
            debounces: Vec::new(),
            resolutions: vec![ResolutionInfo {
                index: 0,
                dpi: Dpi::Unified(800),
                dpi_list: vec![800],
                capabilities: Vec::new(),
                is_active: true,
                is_default: true,
                is_disabled: false,
            }],
            buttons: Vec::new(),
            leds: vec![LedInfo {
                index: 0,
                mode: LedMode::Solid,
                modes: vec![LedMode::Off, LedMode::Solid],
                color: Color::from_rgb(RgbColor { r: 10, g: 20, b: 30 }),
                secondary_color: Color::default(),
                tertiary_color: Color::default(),
                color_depth: 1,
                effect_duration: 0,
                brightness: 255,
            }],
        }
    }

    #[test]
    fn fresh_blob_fails_crc_validation() {
        let blob = OnboardProfileBlob([0u8; ONBOARD_BLOB_SIZE]);
        assert!(blob.validate().is_err());
    }

    #[test]
    fn apply_produces_a_self_consistent_crc() {
        let mut blob = OnboardProfileBlob([0u8; ONBOARD_BLOB_SIZE]);
        blob.apply(&sample_profile());
        assert!(blob.validate().is_ok());
    }

    #[test]
    fn apply_round_trips_name_dpi_and_led() {
        let profile = sample_profile();
        let mut blob = OnboardProfileBlob([0u8; ONBOARD_BLOB_SIZE]);
        blob.apply(&profile);

        assert_eq!(blob.name(), "Old Name");
        assert_eq!(blob.dpi(), 800);
        assert_eq!(blob.led_mode_byte(), LED_HW_MODE_FIXED);
        assert_eq!(blob.led_color(), RgbColor { r: 10, g: 20, b: 30 });
    }

    #[test]
    fn apply_preserves_reserved_bytes_outside_name_dpi_led() {
        let mut raw = [0u8; ONBOARD_BLOB_SIZE];
        raw[24..30].copy_from_slice(&[0xAA; 6]);
        let mut blob = OnboardProfileBlob(raw);
        blob.apply(&sample_profile());
        assert_eq!(&blob.0[24..30], &[0xAA; 6]);
    }

    #[test]
    fn tampered_byte_is_detected_on_validate() {
        let mut blob = OnboardProfileBlob([0u8; ONBOARD_BLOB_SIZE]);
        blob.apply(&sample_profile());
        blob.0[0] ^= 0xFF;
        assert!(blob.validate().is_err());
    }
}
