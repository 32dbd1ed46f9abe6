use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::String;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::connectivity::CredentialSubmissions;
use crate::error::ProvisioningError;
use crate::model::{Credential, NETWORK_ID_MAX, SECRET_MAX};

/// JSON body posted by the provisioning page.
#[derive(Debug, Deserialize)]
struct Submission {
    ssid: String<NETWORK_ID_MAX>,
    password: String<SECRET_MAX>,
}

/// Gate between the web form and the controller's submission channel. It
/// accepts at most one credential per opening.
pub struct CredentialIntake<'a> {
    submissions: &'a CredentialSubmissions,
    open: Mutex<CriticalSectionRawMutex, Cell<bool>>,
}

impl<'a> CredentialIntake<'a> {
    pub const fn new(submissions: &'a CredentialSubmissions) -> Self {
        Self {
            submissions,
            open: Mutex::new(Cell::new(false)),
        }
    }

    pub fn open(&self) {
        self.open.lock(|open| open.set(true));
        debug!("Provisioning: intake open");
    }

    pub fn close(&self) {
        self.open.lock(|open| open.set(false));
    }

    pub fn is_open(&self) -> bool {
        self.open.lock(|open| open.get())
    }

    /// Validates `body` and forwards the credential when the intake is open.
    /// The first accepted submission closes the intake.
    pub fn submit(&self, body: &[u8]) -> Result<(), ProvisioningError> {
        let credential = parse_submission(body)?;
        self.open.lock(|open| {
            if !open.get() {
                warn!("Provisioning: submission for {} ignored, intake closed", credential.network_id);
                return Err(ProvisioningError::Closed);
            }
            let network_id = credential.network_id.clone();
            self.submissions
                .try_send(credential)
                .map_err(|_| ProvisioningError::Closed)?;
            open.set(false);
            info!("Provisioning: credential for {network_id} accepted");
            Ok(())
        })
    }
}

/// Accepts `{"ssid": .., "password": ..}` as sent by the provisioning page and
/// `ssid=..&password=..` from a plain HTML form post.
pub fn parse_submission(body: &[u8]) -> Result<Credential, ProvisioningError> {
    let body = trim_ascii(body);
    if body.first() == Some(&b'{') {
        let mut unescaped = [0u8; SECRET_MAX];
        let (submission, _) =
            serde_json_core::from_slice_escaped::<Submission>(body, &mut unescaped)
                .map_err(|_| ProvisioningError::Malformed)?;
        return Credential::new(&submission.ssid, &submission.password);
    }
    parse_form(body)
}

fn parse_form(body: &[u8]) -> Result<Credential, ProvisioningError> {
    let body = core::str::from_utf8(body).map_err(|_| ProvisioningError::Malformed)?;
    let mut ssid: Option<String<NETWORK_ID_MAX>> = None;
    let mut password: Option<String<SECRET_MAX>> = None;

    for pair in body.split('&') {
        let (key, value) = pair.split_once('=').ok_or(ProvisioningError::Malformed)?;
        match key {
            "ssid" => ssid = Some(url_decode(value, ProvisioningError::NetworkIdTooLong)?),
            "password" => password = Some(url_decode(value, ProvisioningError::SecretTooLong)?),
            _ => {}
        }
    }

    match (ssid, password) {
        (Some(ssid), Some(password)) => Credential::new(&ssid, &password),
        _ => Err(ProvisioningError::Malformed),
    }
}

/// Decodes `+` and `%XX` escapes. `overflow` is returned when the result
/// does not fit.
fn url_decode<const N: usize>(
    input: &str,
    overflow: ProvisioningError,
) -> Result<String<N>, ProvisioningError> {
    let mut bytes = heapless::Vec::<u8, N>::new();
    let mut rest = input.as_bytes();

    while let Some((&byte, tail)) = rest.split_first() {
        rest = tail;
        let decoded = match byte {
            b'+' => b' ',
            b'%' => match (
                rest.first().and_then(|c| (*c as char).to_digit(16)),
                rest.get(1).and_then(|c| (*c as char).to_digit(16)),
            ) {
                (Some(high), Some(low)) => {
                    rest = &rest[2..];
                    (high * 16 + low) as u8
                }
                _ => byte,
            },
            _ => byte,
        };
        bytes.push(decoded).map_err(|_| overflow)?;
    }

    String::from_utf8(bytes).map_err(|_| ProvisioningError::Malformed)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
