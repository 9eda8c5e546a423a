/* Device actor: one tokio task per hardware device, owning the exclusive
 * `DeviceIo` handle and the device's `DeviceDriver`. DBus handlers never touch
 * hardware directly; they mutate the shared `DeviceInfo` and ask the actor to
 * commit, which serializes all I/O for that device onto a single task. */

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, warn};

use crate::device::DeviceInfo;
use crate::driver::{DeviceDriver, DeviceIo};

/* Messages the actor task accepts from its handle. */
enum ActorMessage {
    Commit(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

/* A cheap, cloneable reference to a running device actor. */
#[derive(Clone)]
pub struct ActorHandle {
    tx: mpsc::Sender<ActorMessage>,
}

impl ActorHandle {
    /* Ask the actor to probe the shared `DeviceInfo` against hardware and */
    /* write back any dirty fields. Waits for the actor's response.       */
    pub async fn commit(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ActorMessage::Commit(reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("device actor has already shut down"))?;

        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("device actor dropped the commit reply channel"))?
    }

    /* Ask the actor task to exit and wait for it to do so. */
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(ActorMessage::Shutdown(reply_tx)).await.is_err() {
            return;
        }
        let _ = reply_rx.await;
    }
}

const ACTOR_CHANNEL_CAPACITY: usize = 8;

const MIN_PROFILES: usize = 1;
const MAX_PROFILES: usize = 16;
const MIN_RESOLUTIONS: usize = 1;
const MAX_RESOLUTIONS: usize = 16;

/* Sanity check run once after a successful `load_profiles`. A device whose
 * driver handed back an impossible profile/resolution count is rejected
 * outright rather than registered half-broken on the bus. */
fn check_invariants(info: &DeviceInfo) -> Result<()> {
    let num_profiles = info.profiles.len();
    if !(MIN_PROFILES..=MAX_PROFILES).contains(&num_profiles) {
        return Err(anyhow::anyhow!(
            "invalid state: {} has {num_profiles} profiles, expected {MIN_PROFILES}..={MAX_PROFILES}",
            info.sysname
        ));
    }

    for profile in &info.profiles {
        let num_resolutions = profile.resolutions.len();
        if !(MIN_RESOLUTIONS..=MAX_RESOLUTIONS).contains(&num_resolutions) {
            return Err(anyhow::anyhow!(
                "invalid state: {} profile {} has {num_resolutions} resolutions, expected {MIN_RESOLUTIONS}..={MAX_RESOLUTIONS}",
                info.sysname,
                profile.index
            ));
        }
    }

    Ok(())
}

/* Open the device node, probe it, load the initial profile state into
 * `shared_info`, then spawn the actor task. Returns once the probe has
 * succeeded so the caller only registers devices that are actually
 * speaking the expected protocol. */
pub async fn spawn_device_actor(
    devnode: &Path,
    mut driver: Box<dyn DeviceDriver>,
    shared_info: Arc<RwLock<DeviceInfo>>,
) -> Result<ActorHandle> {
    let mut io = DeviceIo::open(devnode).await?;

    driver.probe(&mut io).await?;

    {
        let mut info = shared_info.write().await;
        driver.load_profiles(&mut io, &mut info).await?;
        check_invariants(&info)?;
    }

    let (tx, mut rx) = mpsc::channel(ACTOR_CHANNEL_CAPACITY);
    let devnode = devnode.to_path_buf();

    tokio::spawn(async move {
        debug!("Device actor started for {}", devnode.display());

        while let Some(msg) = rx.recv().await {
            match msg {
                ActorMessage::Commit(reply) => {
                    let result = {
                        let mut info = shared_info.write().await;
                        driver.commit(&mut io, &mut info).await
                    };
                    if let Err(ref e) = result {
                        warn!("Commit failed for {}: {e:#}", devnode.display());
                    }
                    let _ = reply.send(result);
                }
                ActorMessage::Shutdown(reply) => {
                    debug!("Device actor shutting down for {}", devnode.display());
                    let _ = reply.send(());
                    break;
                }
            }
        }

        if !rx.is_closed() {
            error!("Device actor for {} exited with messages still queued", devnode.display());
        }
    });

    Ok(ActorHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInfo, ProfileInfo};
    use async_trait::async_trait;

    struct NullDriver;

    #[async_trait]
    impl DeviceDriver for NullDriver {
        fn name(&self) -> &str {
            "null"
        }

        async fn probe(&mut self, _io: &mut DeviceIo) -> Result<()> {
            Ok(())
        }

        async fn load_profiles(&mut self, _io: &mut DeviceIo, info: &mut DeviceInfo) -> Result<()> {
            info.profiles.clear();
            Ok(())
        }

        async fn commit(&mut self, _io: &mut DeviceIo, _info: &mut DeviceInfo) -> Result<()> {
            Ok(())
        }
    }

    fn empty_device_info() -> DeviceInfo {
        DeviceInfo {
            sysname: "test0".into(),
            name: "Test".into(),
            model: "usb:0000:0000:0".into(),
            firmware_version: String::new(),
            profiles: Vec::<ProfileInfo>::new(),
            driver_config: crate::device_database::DriverConfig::default(),
        }
    }

    fn one_profile_device_info(num_resolutions: usize) -> DeviceInfo {
        use crate::device::{Dpi, ResolutionInfo};

        let mut info = empty_device_info();
        info.profiles.push(ProfileInfo {
            index: 0,
            name: String::new(),
            is_active: true,
            is_enabled: true,
            is_dirty: false,
            report_rate: 1000,
            report_rates: vec![1000],
            angle_snapping: -1,
            debounce: -1,
            debounces: Vec::new(),
            resolutions: (0..num_resolutions as u32)
                .map(|ri| ResolutionInfo {
                    index: ri,
                    dpi: Dpi::Unified(800),
                    dpi_list: vec![800],
                    capabilities: Vec::new(),
                    is_active: ri == 0,
                    is_default: ri == 0,
                    is_disabled: false,
                })
                .collect(),
            buttons: Vec::new(),
            leds: Vec::new(),
        });
        info
    }

    #[test]
    fn invariants_accept_one_profile_one_resolution() {
        assert!(check_invariants(&one_profile_device_info(1)).is_ok());
    }

    #[test]
    fn invariants_reject_zero_profiles() {
        assert!(check_invariants(&empty_device_info()).is_err());
    }

    #[test]
    fn invariants_reject_zero_resolutions() {
        assert!(check_invariants(&one_profile_device_info(0)).is_err());
    }

    #[test]
    fn invariants_reject_too_many_resolutions() {
        assert!(check_invariants(&one_profile_device_info(MAX_RESOLUTIONS + 1)).is_err());
    }

    #[test]
    fn actor_message_variants_are_distinct() {
        /* Compile-time sanity check that both ActorMessage arms exist and */
        /* carry the reply channel types ActorHandle expects. */
        fn _assert(msg: ActorMessage) {
            match msg {
                ActorMessage::Commit(_) => {}
                ActorMessage::Shutdown(_) => {}
            }
        }
        let _ = empty_device_info();
    }
}
