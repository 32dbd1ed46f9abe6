//! The radio task owns the `WifiController`; everything else talks to it
//! through [`RadioCommands`].

use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, with_timeout};
use esp_radio::wifi::{AccessPointConfig, ClientConfig, ModeConfig, WifiController, WifiError};
use log::{debug, error, info, warn};

use crate::config;
use crate::connectivity::{LinkEvent, LinkEvents};
use crate::error::LinkError;
use crate::model::Credential;
use crate::traits::LinkDriver;

/// Time allowed for DHCP once the station is associated.
const DHCP_WINDOW: Duration = Duration::from_secs(10);

pub enum RadioCommand {
    Associate(Credential),
    StartAccessPoint,
    Stop,
}

pub type RadioCommands = Channel<CriticalSectionRawMutex, RadioCommand, 2>;

/// Result of the last `StartAccessPoint` command.
pub static ACCESS_POINT_STATUS: Signal<CriticalSectionRawMutex, bool> = Signal::new();

#[embassy_executor::task]
pub async fn radio_task(
    mut controller: WifiController<'static>,
    sta_stack: Stack<'static>,
    commands: &'static RadioCommands,
    events: &'static LinkEvents,
) {
    debug!("Radio: task started");
    debug!("Device capabilities: {:?}", controller.capabilities());

    loop {
        match commands.receive().await {
            RadioCommand::Associate(credential) => {
                let event = associate(&mut controller, sta_stack, &credential).await;
                events.send(event).await;
            }
            RadioCommand::StartAccessPoint => {
                let started = start_access_point(&mut controller)
                    .await
                    .inspect_err(|e| error!("Radio: failed to start access point: {e:?}"))
                    .is_ok();
                ACCESS_POINT_STATUS.signal(started);
            }
            RadioCommand::Stop => {
                if let Err(e) = stop(&mut controller).await {
                    warn!("Radio: stop failed: {e:?}");
                }
            }
        }
    }
}

/// Joins the network and waits for a DHCP lease.
async fn associate(
    controller: &mut WifiController<'static>,
    sta_stack: Stack<'static>,
    credential: &Credential,
) -> LinkEvent {
    if let Err(e) = join(controller, credential).await {
        warn!("Radio: association with {} failed: {e:?}", credential.network_id);
        return LinkEvent::AssociationFailed;
    }
    debug!("Radio: associated, waiting for network configuration...");

    match with_timeout(DHCP_WINDOW, sta_stack.wait_config_up()).await {
        Ok(()) => {
            if let Some(config) = sta_stack.config_v4() {
                info!("Radio: got IP {}", config.address);
            }
            LinkEvent::Associated
        }
        Err(_) => {
            warn!("Radio: no DHCP lease from {}", credential.network_id);
            let _ = controller.disconnect_async().await;
            LinkEvent::AssociationFailed
        }
    }
}

async fn join(
    controller: &mut WifiController<'static>,
    credential: &Credential,
) -> Result<(), WifiError> {
    stop(controller).await?;

    let client_config = ClientConfig::default()
        .with_ssid(credential.network_id.as_str().into())
        .with_password(credential.secret.as_str().into());
    controller.set_config(&ModeConfig::Client(client_config))?;

    debug!("Radio: starting station mode...");
    controller.start_async().await?;
    debug!("Radio: connecting to {}...", credential.network_id);
    controller.connect_async().await
}

async fn start_access_point(controller: &mut WifiController<'static>) -> Result<(), WifiError> {
    stop(controller).await?;

    let ap_config = ModeConfig::AccessPoint(
        AccessPointConfig::default()
            .with_ssid(config::ap_ssid().into())
            .with_max_connections(config::AP_MAX_CONNECTIONS),
    );
    controller.set_config(&ap_config)?;
    debug!("Radio: starting access point `{}`", config::ap_ssid());
    controller.start_async().await?;
    info!("Radio: access point started");
    Ok(())
}

async fn stop(controller: &mut WifiController<'static>) -> Result<(), WifiError> {
    if matches!(controller.is_started(), Ok(true)) {
        debug!("Radio: stopping...");
        controller.stop_async().await?;
    }
    Ok(())
}

/// [`LinkDriver`] that forwards association requests to the radio task.
pub struct RadioLink {
    commands: &'static RadioCommands,
}

impl RadioLink {
    pub fn new(commands: &'static RadioCommands) -> Self {
        Self { commands }
    }
}

impl LinkDriver for RadioLink {
    async fn begin_association(&mut self, credential: &Credential) -> Result<(), LinkError> {
        // A full queue means the radio is still busy with a timed-out attempt.
        self.commands
            .try_send(RadioCommand::Associate(credential.clone()))
            .map_err(|_| LinkError::Refused)
    }
}
