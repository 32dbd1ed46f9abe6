use core::fmt;

/// Failure of a single association attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The link driver refused to start the attempt.
    Refused,
    /// The access point rejected the association.
    AssociationFailed,
    /// Neither outcome was reported within the link window.
    Timeout,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused => write!(f, "association request refused by the link driver"),
            Self::AssociationFailed => write!(f, "association failed"),
            Self::Timeout => write!(f, "association timed out"),
        }
    }
}

impl core::error::Error for LinkError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningError {
    /// Body is not a JSON or form encoded credential submission.
    Malformed,
    EmptyNetworkId,
    EmptySecret,
    NetworkIdTooLong,
    SecretTooLong,
    /// The intake already accepted a submission or is not running.
    Closed,
    /// The access point or its services could not be brought up.
    ServiceUnavailable,
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed credential submission"),
            Self::EmptyNetworkId => write!(f, "network id is empty"),
            Self::EmptySecret => write!(f, "secret is empty"),
            Self::NetworkIdTooLong => write!(f, "network id exceeds 32 bytes"),
            Self::SecretTooLong => write!(f, "secret exceeds 64 bytes"),
            Self::Closed => write!(f, "provisioning intake is closed"),
            Self::ServiceUnavailable => write!(f, "provisioning service unavailable"),
        }
    }
}

impl core::error::Error for ProvisioningError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    NotConnected,
    InvalidUrl,
    Dns,
    Connect,
    Io,
    /// Request head did not fit its buffer.
    RequestTooLarge,
    /// Response head could not be parsed or did not fit the buffer.
    InvalidResponse,
    /// The server answered with a status outside 2xx.
    Status(u16),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "link is not connected"),
            Self::InvalidUrl => write!(f, "invalid url"),
            Self::Dns => write!(f, "dns lookup failed"),
            Self::Connect => write!(f, "tcp connect failed"),
            Self::Io => write!(f, "socket i/o error"),
            Self::RequestTooLarge => write!(f, "request head too large"),
            Self::InvalidResponse => write!(f, "invalid http response"),
            Self::Status(code) => write!(f, "unexpected http status {code}"),
        }
    }
}

impl core::error::Error for TransportError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkError {
    Transport(TransportError),
    /// The 2xx body was not the expected JSON document.
    MalformedResponse,
    /// A reading did not fit into the payload buffer.
    PayloadTooLarge,
}

impl fmt::Display for UplinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "uplink transport error: {e}"),
            Self::MalformedResponse => write!(f, "malformed uplink response"),
            Self::PayloadTooLarge => write!(f, "measurement payload too large"),
        }
    }
}

impl core::error::Error for UplinkError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for UplinkError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    Transport(TransportError),
    /// The first byte of the download is not an application image.
    InvalidImage,
    /// Fewer or more bytes arrived than the server announced.
    SizeMismatch { expected: u32, received: u32 },
    /// The image does not fit into the next OTA partition.
    TooLarge,
    Partition,
    Flash,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "firmware download failed: {e}"),
            Self::InvalidImage => write!(f, "downloaded data is not a firmware image"),
            Self::SizeMismatch { expected, received } => {
                write!(f, "firmware size mismatch: expected {expected}, received {received}")
            }
            Self::TooLarge => write!(f, "firmware image larger than the ota partition"),
            Self::Partition => write!(f, "ota partition table error"),
            Self::Flash => write!(f, "flash write failed"),
        }
    }
}

impl core::error::Error for OtaError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for OtaError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The storage medium reported a read or write failure.
    Io,
    /// The record does not fit into its sector.
    TooLarge,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "storage i/o error"),
            Self::TooLarge => write!(f, "record too large"),
        }
    }
}

impl core::error::Error for StoreError {}
