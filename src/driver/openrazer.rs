/* Openrazer driver. */
/*                                                                        */
/* This driver does not talk to hardware directly: it proxies onto the   */
/* system-bus `org.razer` broker the same way openrazer-daemon's own      */
/* Python clients do, calling `setDPI` / `setPollRate` / the per-zone LED */
/* setters on the device's own bus object. If the broker is not running, */
/* device operations surface as `NoDevice` rather than a hardware error.  */

use crate::device::{DeviceInfo, LedMode};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;
use zbus::proxy;
use zbus::zvariant::OwnedObjectPath;

use crate::driver::{DeviceDriver, DeviceIo};

const RAZER_BUS_NAME: &str = "org.razer";
const RAZER_DAEMON_PATH: &str = "/org/razer";

#[proxy(
    interface = "razer.daemon",
    default_service = "org.razer",
    default_path = "/org/razer"
)]
trait RazerDaemon {
    #[zbus(name = "getDevices")]
    fn get_devices(&self) -> zbus::Result<Vec<String>>;
}

#[proxy(interface = "razer.device.dpi", default_service = "org.razer")]
trait RazerDpi {
    #[zbus(name = "setDPI")]
    fn set_dpi(&self, dpi_x: i32, dpi_y: i32) -> zbus::Result<()>;

    #[zbus(name = "setPollRate")]
    fn set_poll_rate(&self, rate: i32) -> zbus::Result<()>;
}

#[proxy(interface = "razer.device.lighting.chroma", default_service = "org.razer")]
trait RazerLighting {
    #[zbus(name = "setLogoBrightness")]
    fn set_logo_brightness(&self, brightness: f64) -> zbus::Result<()>;

    #[zbus(name = "setLogoStatic")]
    fn set_logo_static(&self, r: u8, g: u8, b: u8) -> zbus::Result<()>;

    #[zbus(name = "setLogoSpectrum")]
    fn set_logo_spectrum(&self) -> zbus::Result<()>;

    #[zbus(name = "setLogoPulsate")]
    fn set_logo_pulsate(&self, r: u8, g: u8, b: u8) -> zbus::Result<()>;

    #[zbus(name = "setScrollBrightness")]
    fn set_scroll_brightness(&self, brightness: f64) -> zbus::Result<()>;

    #[zbus(name = "setScrollStatic")]
    fn set_scroll_static(&self, r: u8, g: u8, b: u8) -> zbus::Result<()>;

    #[zbus(name = "setScrollSpectrum")]
    fn set_scroll_spectrum(&self) -> zbus::Result<()>;

    #[zbus(name = "setScrollPulsate")]
    fn set_scroll_pulsate(&self, r: u8, g: u8, b: u8) -> zbus::Result<()>;
}

pub struct OpenrazerDriver {
    serial: Option<String>,
}

impl OpenrazerDriver {
    pub fn new() -> Self {
        Self { serial: None }
    }

    async fn connect(&self) -> Result<zbus::Connection> {
        zbus::Connection::system()
            .await
            .context("openrazer: failed to connect to the system bus")
    }

    fn device_path(&self) -> Result<OwnedObjectPath> {
        let serial = self
            .serial
            .as_ref()
            .context("openrazer: device serial not resolved yet, call probe() first")?;
        OwnedObjectPath::try_from(format!("{RAZER_DAEMON_PATH}/{serial}"))
            .context("openrazer: invalid device object path")
    }
}

#[async_trait]
impl DeviceDriver for OpenrazerDriver {
    fn name(&self) -> &str {
        "openrazer"
    }

    async fn probe(&mut self, _io: &mut DeviceIo) -> Result<()> {
        let conn = self.connect().await?;
        let daemon = RazerDaemonProxy::builder(&conn)
            .destination(RAZER_BUS_NAME)?
            .path(RAZER_DAEMON_PATH)?
            .build()
            .await
            .context("openrazer: failed to bind daemon proxy")?;

        let devices = daemon
            .get_devices()
            .await
            .context("openrazer: broker did not respond; is openrazer-daemon running?")?;

        self.serial = devices.into_iter().next();
        if self.serial.is_none() {
            anyhow::bail!("openrazer: broker reported no devices (NoDevice)");
        }
        debug!("openrazer bound to serial {:?}", self.serial);
        Ok(())
    }

    async fn load_profiles(&mut self, _io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        /* openrazer devices have a single implicit profile; hardware state */
        /* for DPI/poll-rate/LEDs lives entirely on the broker side and is  */
        /* opaque to us until a commit pushes new values.                   */
        info.profiles.clear();
        info.profiles.push(crate::device::ProfileInfo {
            index: 0,
            name: "Default".to_string(),
            is_active: true,
            is_enabled: true,
            is_dirty: false,
            resolutions: vec![crate::device::ResolutionInfo {
                index: 0,
                dpi: crate::device::Dpi::Unknown,
                dpi_list: vec![],
                capabilities: Vec::new(),
                is_active: true,
                is_default: true,
                is_disabled: false,
            }],
            buttons: Vec::new(),
            leds: vec![
                crate::device::LedInfo {
                    index: 0,
                    mode: LedMode::Off,
                    modes: vec![LedMode::Off, LedMode::Solid, LedMode::Cycle, LedMode::Breathing],
                    color: crate::device::Color::default(),
                    secondary_color: crate::device::Color::default(),
                    tertiary_color: crate::device::Color::default(),
                    color_depth: 1,
                    effect_duration: 0,
                    brightness: 255,
                },
                crate::device::LedInfo {
                    index: 1,
                    mode: LedMode::Off,
                    modes: vec![LedMode::Off, LedMode::Solid, LedMode::Cycle, LedMode::Breathing],
                    color: crate::device::Color::default(),
                    secondary_color: crate::device::Color::default(),
                    tertiary_color: crate::device::Color::default(),
                    color_depth: 1,
                    effect_duration: 0,
                    brightness: 255,
                },
            ],
            report_rate: 500,
            report_rates: vec![125, 250, 500, 1000],
            angle_snapping: -1,
            debounce: -1,
            debounces: Vec::new(),
        });
        Ok(())
    }

    async fn commit(&mut self, _io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        let Some(profile) = info.profiles.first() else {
            return Ok(());
        };
        if !profile.is_dirty {
            return Ok(());
        }

        let conn = self.connect().await?;
        let path = self.device_path()?;

        let dpi = RazerDpiProxy::builder(&conn)
            .destination(RAZER_BUS_NAME)?
            .path(path.clone())?
            .build()
            .await
            .context("openrazer: failed to bind dpi proxy")?;

        if let Some(res) = profile.resolutions.first() {
            match res.dpi {
                crate::device::Dpi::Unified(v) => {
                    dpi.set_dpi(v as i32, v as i32).await.context("openrazer: setDPI failed")?;
                }
                crate::device::Dpi::Separate { x, y } => {
                    dpi.set_dpi(x as i32, y as i32).await.context("openrazer: setDPI failed")?;
                }
                crate::device::Dpi::Unknown => {}
            }
        }
        dpi.set_poll_rate(profile.report_rate as i32)
            .await
            .context("openrazer: setPollRate failed")?;

        let lighting = RazerLightingProxy::builder(&conn)
            .destination(RAZER_BUS_NAME)?
            .path(path)?
            .build()
            .await
            .context("openrazer: failed to bind lighting proxy")?;

        for led in &profile.leds {
            let rgb = led.color.to_rgb();
            let set_result = match (led.index, led.mode) {
                (0, LedMode::Solid) => lighting.set_logo_static(rgb.r, rgb.g, rgb.b).await,
                (0, LedMode::Cycle) => lighting.set_logo_spectrum().await,
                (0, LedMode::Breathing) => lighting.set_logo_pulsate(rgb.r, rgb.g, rgb.b).await,
                (1, LedMode::Solid) => lighting.set_scroll_static(rgb.r, rgb.g, rgb.b).await,
                (1, LedMode::Cycle) => lighting.set_scroll_spectrum().await,
                (1, LedMode::Breathing) => lighting.set_scroll_pulsate(rgb.r, rgb.g, rgb.b).await,
                _ => Ok(()),
            };
            set_result.context("openrazer: LED setter failed")?;

            let brightness = f64::from(led.brightness) / 255.0 * 100.0;
            let brightness_result = match led.index {
                0 => lighting.set_logo_brightness(brightness).await,
                1 => lighting.set_scroll_brightness(brightness).await,
                _ => Ok(()),
            };
            brightness_result.context("openrazer: brightness setter failed")?;
        }

        info.profiles[0].is_dirty = false;
        Ok(())
    }
}
