//! Seams between the boot-cycle logic and the hardware it runs on. The
//! firmware module implements these for the ESP32-C3; tests implement them
//! with in-memory fakes.

use crate::error::{LinkError, OtaError, ProvisioningError, StoreError, TransportError};
use crate::model::{Credential, ThresholdLimits};

#[allow(async_fn_in_trait)]
pub trait CredentialStore {
    async fn get_credential(&mut self) -> Result<Option<Credential>, StoreError>;
    async fn set_credential(&mut self, credential: &Credential) -> Result<(), StoreError>;
    async fn get_limits(&mut self) -> Result<Option<ThresholdLimits>, StoreError>;
    async fn set_limits(&mut self, limits: &ThresholdLimits) -> Result<(), StoreError>;
}

/// Starts association attempts. The outcome of an accepted request is
/// reported later as a [`LinkEvent`](crate::connectivity::LinkEvent).
#[allow(async_fn_in_trait)]
pub trait LinkDriver {
    async fn begin_association(&mut self, credential: &Credential) -> Result<(), LinkError>;
}

/// Local access point plus web form that accepts a credential. Submissions are
/// delivered on the controller's submission channel.
#[allow(async_fn_in_trait)]
pub trait ProvisioningService {
    async fn start(&mut self) -> Result<(), ProvisioningError>;
    async fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Number of body bytes written into the caller's buffer.
    pub body_len: usize,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[allow(async_fn_in_trait)]
pub trait UplinkTransport {
    async fn post(
        &mut self,
        url: &str,
        body: &[u8],
        headers: &[(&str, &str)],
        response: &mut [u8],
    ) -> Result<HttpResponse, TransportError>;
}

#[allow(async_fn_in_trait)]
pub trait OtaPrimitive {
    /// Downloads the image at `url` into the inactive slot and marks it for
    /// the next boot.
    async fn fetch_and_apply(&mut self, url: &str) -> Result<(), OtaError>;

    fn restart(&mut self) -> !;
}

/// Output raised while a reading is outside its stored range.
pub trait AlertOutput {
    fn set_alert(&mut self, active: bool);

    /// Keeps the current level while the node is in deep sleep.
    fn hold(&mut self);
}
