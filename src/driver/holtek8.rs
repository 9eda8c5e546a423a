/* Holtek8 protocol driver. */
/*  */
/* Holtek8 devices use an 8-byte control frame on feature report 0 plus a */
/* stream of input/output report "chunks" to move bulk profile, button and */
/* macro data. Unlike HID++, there is no request/response echo by sub_id: */
/* the control frame selects what the next chunk stream refers to, and the */
/* device is polled for a `bytes_left` counter while writing.             */

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::device::DeviceInfo;
use crate::driver::{DeviceDriver, DeviceIo, DriverError};

/* Control-frame commands (`cmd` byte). */
const CMD_READ_ACTIVE_PROFILE: u8 = 0x82;
const CMD_READ_RATE: u8 = 0x83;
const CMD_READ_RESOLUTION: u8 = 0x84;
const CMD_READ_PROFILE_DATA: u8 = 0x8C;
const CMD_READ_BUTTON_CONFIG: u8 = 0x8D;
#[allow(dead_code)]
const CMD_READ_MACRO_DATA: u8 = 0x8F;
const CMD_PAGE_JUMP: u8 = 0xFE;

const API_B_CHUNK_SIZE: usize = 64;

/* Write-ready poll retry budget and spacing, per spec. */
const WRITE_READY_MAX_POLLS: u8 = 10;
const WRITE_READY_POLL_SPACING_MS: u64 = 1;

const MACRO_PAGE_TERMINATOR: (u8, u8) = (0, 0);

/* Which byte of the poll response carries `bytes_left`, by API variant. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoltekApi {
    A,
    B,
}

impl HoltekApi {
    fn bytes_left_index(self) -> usize {
        match self {
            HoltekApi::A => 3,
            HoltekApi::B => 1,
        }
    }

    fn chunk_size(self, variable_len: usize) -> usize {
        match self {
            HoltekApi::A => variable_len,
            HoltekApi::B => API_B_CHUNK_SIZE,
        }
    }
}

/* Build the 8-byte `{cmd, arg[6], checksum}` control frame. */
/*  */
/* `checksum = 0xFF - cmd - sum(arg)`, all wrapping. Some command/arg */
/* combinations (0xE/0xF with an arg over 50) are refused outright: the */
/* source hardware treats them as a factory-reset-adjacent footgun.      */
pub fn build_control_frame(cmd: u8, arg: [u8; 6]) -> Result<[u8; 8]> {
    if (cmd == 0x0E || cmd == 0x0F) && arg.iter().any(|&a| a > 50) {
        return Err(DriverError::ProtocolError {
            sub_id: cmd,
            error: arg.iter().copied().max().unwrap_or(0),
        }
        .into());
    }

    let mut frame = [0u8; 8];
    frame[0] = cmd;
    frame[1..7].copy_from_slice(&arg);
    let sum: u8 = arg.iter().fold(cmd, |acc, &a| acc.wrapping_add(a));
    frame[7] = 0xFFu8.wrapping_sub(sum);
    Ok(frame)
}

pub fn checksum_is_valid(frame: &[u8; 8]) -> bool {
    let sum: u8 = frame[1..7].iter().fold(frame[0], |acc, &a| acc.wrapping_add(a));
    frame[7] == 0xFFu8.wrapping_sub(sum)
}

pub struct Holtek8Driver {
    api: HoltekApi,
    password: Option<[u8; 4]>,
}

impl Holtek8Driver {
    pub fn new() -> Self {
        Self {
            api: HoltekApi::B,
            password: None,
        }
    }

    /* Drain any stale input reports left over from a previous operation. */
    async fn drain_stale_reports(&self, io: &mut DeviceIo) {
        let mut buf = [0u8; API_B_CHUNK_SIZE];
        for _ in 0..4 {
            match tokio::time::timeout(
                std::time::Duration::from_millis(1),
                io.read_report(&mut buf),
            )
            .await
            {
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
    }

    /* Chunked read: set the control command, ack via GET, then read */
    /* `len / chunk_size` input reports of exactly `chunk_size` bytes. */
    async fn chunked_read(&self, io: &mut DeviceIo, cmd: u8, len: usize) -> Result<Vec<u8>> {
        let frame = build_control_frame(cmd, [0; 6])?;
        let mut set_buf = frame;
        io.set_feature_report(&mut set_buf)
            .context("Holtek8: failed to set read control frame")?;

        self.drain_stale_reports(io).await;

        let mut ack = [0u8; 8];
        ack[0] = cmd;
        io.get_feature_report(&mut ack)
            .context("Holtek8: failed to acknowledge read command")?;

        let chunk_size = self.api.chunk_size(len);
        if chunk_size == 0 {
            return Ok(Vec::new());
        }
        let num_chunks = len.div_ceil(chunk_size);
        let mut out = Vec::with_capacity(len);

        for _ in 0..num_chunks {
            let mut buf = vec![0u8; chunk_size];
            let n = io
                .read_report(&mut buf)
                .await
                .context("Holtek8: chunk read failed")?;
            if n != chunk_size {
                return Err(DriverError::BufferTooSmall {
                    expected: chunk_size,
                    actual: n,
                }
                .into());
            }
            out.extend_from_slice(&buf);
        }

        out.truncate(len);
        Ok(out)
    }

    /* Poll the control register until `bytes_left` matches `expected`, */
    /* up to `WRITE_READY_MAX_POLLS` retries at 1 ms spacing. */
    async fn poll_bytes_left(&self, io: &mut DeviceIo, expected: u32) -> Result<()> {
        for _ in 0..WRITE_READY_MAX_POLLS {
            let mut buf = [0u8; 8];
            io.get_feature_report(&mut buf)
                .context("Holtek8: write-ready poll failed")?;
            let idx = self.api.bytes_left_index();
            let bytes_left = buf.get(idx).copied().unwrap_or(0xFF) as u32;
            if bytes_left == expected {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_millis(WRITE_READY_POLL_SPACING_MS)).await;
        }
        Err(DriverError::IoctlFailed(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "Holtek8 write never reached bytes_left=0",
        ))
        .into())
    }

    /* Chunked write: each chunk is preceded by a poll for the running */
    /* `bytes_left` counter, a zeroed report id, then `chunk_size` bytes. */
    /* A final poll after the last chunk expects `bytes_left == 0`.       */
    async fn chunked_write(&self, io: &mut DeviceIo, data: &[u8]) -> Result<()> {
        let chunk_size = self.api.chunk_size(data.len().max(1));
        let mut remaining = data.len() as u32;

        for chunk in data.chunks(chunk_size) {
            self.poll_bytes_left(io, remaining).await?;

            let mut buf = vec![0u8; chunk_size + 1];
            buf[1..1 + chunk.len()].copy_from_slice(chunk);
            io.write_report(&buf).await.context("Holtek8: chunk write failed")?;

            remaining = remaining.saturating_sub(chunk.len() as u32);
        }

        self.poll_bytes_left(io, 0).await
    }

    /* ECHO round-trip used to unlock password-gated devices. */
    /* `cmd=0x00, arg=[R,A,T,B,0,0]`; device must return the same 4 bytes. */
    async fn unlock(&self, io: &mut DeviceIo, password: [u8; 4]) -> Result<()> {
        let arg = [password[0], password[1], password[2], password[3], 0, 0];
        let mut frame = build_control_frame(0x00, arg)?;
        io.set_feature_report(&mut frame)
            .context("Holtek8: password ECHO write failed")?;

        let mut reply = [0u8; 8];
        io.get_feature_report(&mut reply)
            .context("Holtek8: password ECHO read failed")?;

        if reply[1..5] != password {
            return Err(anyhow::anyhow!("Holtek8: password mismatch, access denied"));
        }
        Ok(())
    }

    /* Parse a paged macro stream, stopping at the `{0,0}` terminator or */
    /* the end of a non-linkable page. API-A pages never jump.          */
    fn parse_macro_events(&self, raw: &[u8]) -> Vec<(u32, u32)> {
        let mut events = Vec::new();
        for pair in raw.chunks_exact(2) {
            let (keycode, flag) = (pair[0], pair[1]);
            if (keycode, flag) == MACRO_PAGE_TERMINATOR {
                break;
            }
            if self.api == HoltekApi::B && flag == CMD_PAGE_JUMP {
                continue; /* page-jump marker, not a keystroke */
            }
            events.push((u32::from(flag), u32::from(keycode)));
        }
        events
    }
}

#[async_trait]
impl DeviceDriver for Holtek8Driver {
    fn name(&self) -> &str {
        "Holtek8"
    }

    async fn probe(&mut self, io: &mut DeviceIo) -> Result<()> {
        if let Some(password) = self.password {
            self.unlock(io, password).await?;
        }

        let active = self.chunked_read(io, CMD_READ_ACTIVE_PROFILE, 1).await?;
        debug!("Holtek8 probed. Active profile = {:?}", active.first());
        Ok(())
    }

    async fn load_profiles(&mut self, io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        let active_idx = self
            .chunked_read(io, CMD_READ_ACTIVE_PROFILE, 1)
            .await
            .ok()
            .and_then(|b| b.first().copied())
            .unwrap_or(0) as u32;

        for profile in &mut info.profiles {
            profile.is_active = profile.index == active_idx;

            if let Ok(rate_bytes) = self.chunked_read(io, CMD_READ_RATE, 1).await
                && let Some(&raw_rate) = rate_bytes.first()
                && raw_rate > 0
            {
                profile.report_rate = 1000 / u32::from(raw_rate);
            }

            if let Ok(res_bytes) = self.chunked_read(io, CMD_READ_RESOLUTION, 2).await
                && res_bytes.len() == 2
            {
                let dpi = u32::from(res_bytes[0]) * 100 + 400;
                if let Some(res) = profile.resolutions.first_mut() {
                    res.dpi = crate::device::Dpi::Unified(dpi);
                }
                let _ = res_bytes[1];
            }

            if let Ok(_profile_data) = self.chunked_read(io, CMD_READ_PROFILE_DATA, 64).await {
                /* Profile-wide metadata (name, angle snap, debounce) lives here; */
                /* the uniform model only exposes the fields decoded above. */
            }

            if let Ok(button_cfg) = self.chunked_read(io, CMD_READ_BUTTON_CONFIG, profile.buttons.len() * 2).await {
                for (btn, raw) in profile.buttons.iter_mut().zip(button_cfg.chunks(2)) {
                    if let [code, _arg] = raw {
                        btn.action_type = crate::device::ActionType::Button;
                        btn.mapping_value = u32::from(*code);
                    }
                }
            }
        }

        Ok(())
    }

    async fn commit(&mut self, io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        let Some(profile_idx) = info.profiles.iter().position(|p| p.is_active) else {
            return Ok(());
        };

        if !info.profiles[profile_idx].is_dirty {
            return Ok(());
        }

        let button_bytes: Vec<u8> = info.profiles[profile_idx]
            .buttons
            .iter()
            .flat_map(|b| [b.mapping_value as u8, 0u8])
            .collect();
        if !button_bytes.is_empty() {
            self.chunked_write(io, &button_bytes)
                .await
                .context("Holtek8: failed to commit button config")?;
        }

        let macro_buttons: Vec<(u32, Vec<(u32, u32)>)> = info.profiles[profile_idx]
            .buttons
            .iter()
            .filter(|b| b.action_type == crate::device::ActionType::Macro)
            .map(|b| (b.index, b.macro_entries.clone()))
            .collect();

        for (button_index, macro_entries) in macro_buttons {
            let raw: Vec<u8> = macro_entries
                .iter()
                .flat_map(|&(flag, key)| [key as u8, flag as u8])
                .collect();
            if raw.len() > 256 {
                return Err(DriverError::BufferTooSmall { expected: 256, actual: raw.len() }.into());
            }
            self.chunked_write(io, &raw)
                .await
                .with_context(|| format!("Holtek8: failed to commit macro for button {button_index}"))?;
        }

        let profile = &info.profiles[profile_idx];
        let active_frame = build_control_frame(0x80, [profile.index as u8, 0, 0, 0, 0, 0])?;
        let mut buf = active_frame;
        io.set_feature_report(&mut buf)
            .context("Holtek8: failed to commit active profile")?;

        info.profiles[profile_idx].is_dirty = false;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_spec_formula() {
        /* cmd=0x00, arg=[R,A,T,B,0,0] = ['R'=0x52,'A'=0x41,'T'=0x54,'B'=0x42,0,0] */
        let arg = [b'R', b'A', b'T', b'B', 0, 0];
        let frame = build_control_frame(0x00, arg).unwrap();
        assert!(checksum_is_valid(&frame));
        let sum: u32 = 0x00 + 0x52 + 0x41 + 0x54 + 0x42;
        assert_eq!(frame[7], (0xFFu32 - sum) as u8);
    }

    #[test]
    fn dangerous_command_refused() {
        assert!(build_control_frame(0x0E, [51, 0, 0, 0, 0, 0]).is_err());
        assert!(build_control_frame(0x0E, [50, 0, 0, 0, 0, 0]).is_ok());
    }

    #[test]
    fn api_bytes_left_index_differs_by_variant() {
        assert_eq!(HoltekApi::A.bytes_left_index(), 3);
        assert_eq!(HoltekApi::B.bytes_left_index(), 1);
    }

    #[test]
    fn macro_parse_stops_at_terminator() {
        let driver = Holtek8Driver::new();
        let raw = [0x41, 0x01, 0x42, 0x01, 0x00, 0x00, 0x99, 0x99];
        let events = driver.parse_macro_events(&raw);
        assert_eq!(events, vec![(1, 0x41), (1, 0x42)]);
    }
}
