//! Boot-time link establishment: the stored credential first, then the
//! provisioning fallback.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Instant, with_deadline, with_timeout};
use log::{info, warn};

use crate::config::ControllerConfig;
use crate::error::LinkError;
use crate::model::{ConnectivityOutcome, Credential};
use crate::traits::{CredentialStore, LinkDriver, ProvisioningService};

/// Association outcome reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Associated,
    AssociationFailed,
}

pub type LinkEvents = Channel<CriticalSectionRawMutex, LinkEvent, 4>;

/// Credentials accepted by the provisioning intake, in submission order.
pub type CredentialSubmissions = Channel<CriticalSectionRawMutex, Credential, 1>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Idle,
    AssociatingPrimary { attempt: u8 },
    RetryPrimary { failures: u8 },
    ProvisioningFallback,
    AwaitingCredentials,
    AssociatingProvisioned,
    Connected,
    Failed,
}

/// Drives one boot's worth of association attempts to a terminal
/// [`ConnectivityOutcome`].
pub struct ConnectivityController<'a, S, L, P> {
    config: ControllerConfig,
    store: &'a mut S,
    link: &'a mut L,
    provisioning: &'a mut P,
    link_events: &'a LinkEvents,
    submissions: &'a CredentialSubmissions,
    state: ConnectivityState,
}

impl<'a, S, L, P> ConnectivityController<'a, S, L, P>
where
    S: CredentialStore,
    L: LinkDriver,
    P: ProvisioningService,
{
    pub fn new(
        config: ControllerConfig,
        store: &'a mut S,
        link: &'a mut L,
        provisioning: &'a mut P,
        link_events: &'a LinkEvents,
        submissions: &'a CredentialSubmissions,
    ) -> Self {
        Self {
            config,
            store,
            link,
            provisioning,
            link_events,
            submissions,
            state: ConnectivityState::Idle,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Runs the state machine until it reaches `Connected` or `Failed`. On
    /// `Connected` the link is left up.
    pub async fn run(&mut self) -> ConnectivityOutcome {
        let mut credential: Option<Credential> = None;

        loop {
            let next = match self.state {
                ConnectivityState::Idle => match self.load_credential().await {
                    Some(stored) => {
                        credential = Some(stored);
                        ConnectivityState::AssociatingPrimary { attempt: 1 }
                    }
                    None => ConnectivityState::ProvisioningFallback,
                },
                ConnectivityState::AssociatingPrimary { attempt } => {
                    match self.attempt(credential.as_ref()).await {
                        Ok(()) => ConnectivityState::Connected,
                        Err(e) => {
                            warn!(
                                "Connectivity: attempt {attempt}/{} failed: {e}",
                                self.config.retry_budget
                            );
                            if attempt >= self.config.retry_budget {
                                ConnectivityState::ProvisioningFallback
                            } else {
                                ConnectivityState::RetryPrimary { failures: attempt }
                            }
                        }
                    }
                }
                ConnectivityState::RetryPrimary { failures } => {
                    ConnectivityState::AssociatingPrimary {
                        attempt: failures + 1,
                    }
                }
                ConnectivityState::ProvisioningFallback => match self.provisioning.start().await {
                    Ok(()) => ConnectivityState::AwaitingCredentials,
                    Err(e) => {
                        warn!("Connectivity: provisioning service failed to start: {e}");
                        ConnectivityState::Failed
                    }
                },
                ConnectivityState::AwaitingCredentials => match self.await_submission().await {
                    Some(fresh) => {
                        if let Err(e) = self.store.set_credential(&fresh).await {
                            warn!("Connectivity: could not persist credential: {e}");
                        }
                        self.provisioning.stop().await;
                        credential = Some(fresh);
                        ConnectivityState::AssociatingProvisioned
                    }
                    None => {
                        self.provisioning.stop().await;
                        ConnectivityState::Failed
                    }
                },
                ConnectivityState::AssociatingProvisioned => {
                    match self.attempt(credential.as_ref()).await {
                        Ok(()) => ConnectivityState::Connected,
                        Err(e) => {
                            warn!("Connectivity: provisioned credential failed: {e}");
                            ConnectivityState::Failed
                        }
                    }
                }
                ConnectivityState::Connected => return ConnectivityOutcome::Connected,
                ConnectivityState::Failed => return ConnectivityOutcome::Failed,
            };
            info!("Connectivity: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    async fn load_credential(&mut self) -> Option<Credential> {
        match self.store.get_credential().await {
            Ok(Some(credential)) if credential.validate().is_ok() => Some(credential),
            Ok(Some(_)) => {
                warn!("Connectivity: stored credential is incomplete, ignoring it");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Connectivity: credential store unreadable: {e}");
                None
            }
        }
    }

    /// One association attempt bounded by the link window.
    async fn attempt(&mut self, credential: Option<&Credential>) -> Result<(), LinkError> {
        let credential = credential.ok_or(LinkError::Refused)?;

        // Outcomes of earlier, timed-out attempts must not be read as ours.
        while self.link_events.try_receive().is_ok() {}

        info!("Connectivity: associating with {}", credential.network_id);
        self.link.begin_association(credential).await?;
        match with_timeout(self.config.link_window, self.link_events.receive()).await {
            Ok(LinkEvent::Associated) => Ok(()),
            Ok(LinkEvent::AssociationFailed) => Err(LinkError::AssociationFailed),
            Err(_) => Err(LinkError::Timeout),
        }
    }

    /// Waits for the first submission that passes validation. `None` only when
    /// the optional credential timeout expires.
    async fn await_submission(&mut self) -> Option<Credential> {
        let deadline = self
            .config
            .credential_timeout
            .map(|timeout| Instant::now() + timeout);

        loop {
            let submitted = match deadline {
                Some(deadline) => match with_deadline(deadline, self.submissions.receive()).await {
                    Ok(credential) => credential,
                    Err(_) => {
                        warn!("Connectivity: no credential submitted before the deadline");
                        return None;
                    }
                },
                None => self.submissions.receive().await,
            };
            match submitted.validate() {
                Ok(()) => {
                    info!("Connectivity: credential received for {}", submitted.network_id);
                    return Some(submitted);
                }
                Err(e) => warn!("Connectivity: submission rejected: {e}"),
            }
        }
    }
}
