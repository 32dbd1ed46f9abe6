//! Values that flow between the connectivity, uplink and alert stages of one
//! boot cycle.

use heapless::String;

use crate::error::ProvisioningError;

pub const NETWORK_ID_MAX: usize = 32;
pub const SECRET_MAX: usize = 64;

/// Network id and secret of the one configured network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub network_id: String<NETWORK_ID_MAX>,
    pub secret: String<SECRET_MAX>,
}

impl Credential {
    /// Builds a credential accepted for association: both parts non-empty and
    /// within their byte limits.
    pub fn new(network_id: &str, secret: &str) -> Result<Self, ProvisioningError> {
        if network_id.is_empty() {
            return Err(ProvisioningError::EmptyNetworkId);
        }
        if secret.is_empty() {
            return Err(ProvisioningError::EmptySecret);
        }
        let network_id =
            String::try_from(network_id).map_err(|_| ProvisioningError::NetworkIdTooLong)?;
        let secret = String::try_from(secret).map_err(|_| ProvisioningError::SecretTooLong)?;
        Ok(Self { network_id, secret })
    }

    pub fn validate(&self) -> Result<(), ProvisioningError> {
        if self.network_id.is_empty() {
            Err(ProvisioningError::EmptyNetworkId)
        } else if self.secret.is_empty() {
            Err(ProvisioningError::EmptySecret)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    /// Accepts every finite reading.
    pub const UNBOUNDED: Self = Self {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };

    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Out of range means strictly below `min` or strictly above `max`.
    pub fn contains(&self, value: f64) -> bool {
        !(value < self.min || value > self.max)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeasurementKind {
    Moisture,
    Temperature,
    Humidity,
    Pressure,
    White,
    Visible,
}

impl MeasurementKind {
    pub const ALL: [Self; 6] = [
        Self::Moisture,
        Self::Temperature,
        Self::Humidity,
        Self::Pressure,
        Self::White,
        Self::Visible,
    ];

    /// Key used for this kind in payloads and responses.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Moisture => "moisture",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::White => "white",
            Self::Visible => "visible",
        }
    }
}

/// Acceptable range per measurement kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThresholdLimits {
    pub moisture: Range,
    pub temperature: Range,
    pub humidity: Range,
    pub pressure: Range,
    pub white: Range,
    pub visible: Range,
}

impl ThresholdLimits {
    /// Base record for merging when nothing has been stored yet.
    pub const UNBOUNDED: Self = Self {
        moisture: Range::UNBOUNDED,
        temperature: Range::UNBOUNDED,
        humidity: Range::UNBOUNDED,
        pressure: Range::UNBOUNDED,
        white: Range::UNBOUNDED,
        visible: Range::UNBOUNDED,
    };

    pub fn range(&self, kind: MeasurementKind) -> Range {
        match kind {
            MeasurementKind::Moisture => self.moisture,
            MeasurementKind::Temperature => self.temperature,
            MeasurementKind::Humidity => self.humidity,
            MeasurementKind::Pressure => self.pressure,
            MeasurementKind::White => self.white,
            MeasurementKind::Visible => self.visible,
        }
    }

    fn range_mut(&mut self, kind: MeasurementKind) -> &mut Range {
        match kind {
            MeasurementKind::Moisture => &mut self.moisture,
            MeasurementKind::Temperature => &mut self.temperature,
            MeasurementKind::Humidity => &mut self.humidity,
            MeasurementKind::Pressure => &mut self.pressure,
            MeasurementKind::White => &mut self.white,
            MeasurementKind::Visible => &mut self.visible,
        }
    }

    /// Overwrites every range present in `update` and leaves the others as
    /// they are. Returns how many ranges were replaced.
    pub fn merge(&mut self, update: &LimitsUpdate) -> usize {
        let mut replaced = 0;
        for kind in MeasurementKind::ALL {
            if let Some(range) = update.range(kind) {
                *self.range_mut(kind) = range;
                replaced += 1;
            }
        }
        replaced
    }
}

/// Ranges carried by one server response; absent ranges keep their stored
/// value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LimitsUpdate {
    pub moisture: Option<Range>,
    pub temperature: Option<Range>,
    pub humidity: Option<Range>,
    pub pressure: Option<Range>,
    pub white: Option<Range>,
    pub visible: Option<Range>,
}

impl LimitsUpdate {
    pub fn range(&self, kind: MeasurementKind) -> Option<Range> {
        match kind {
            MeasurementKind::Moisture => self.moisture,
            MeasurementKind::Temperature => self.temperature,
            MeasurementKind::Humidity => self.humidity,
            MeasurementKind::Pressure => self.pressure,
            MeasurementKind::White => self.white,
            MeasurementKind::Visible => self.visible,
        }
    }

    pub fn is_empty(&self) -> bool {
        MeasurementKind::ALL
            .iter()
            .all(|kind| self.range(*kind).is_none())
    }
}

/// One cycle's readings, tagged with the firmware version that took them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub white: f64,
    pub visible: f64,
    pub version: &'static str,
}

impl Measurement {
    pub fn value(&self, kind: MeasurementKind) -> f64 {
        match kind {
            MeasurementKind::Moisture => self.moisture,
            MeasurementKind::Temperature => self.temperature,
            MeasurementKind::Humidity => self.humidity,
            MeasurementKind::Pressure => self.pressure,
            MeasurementKind::White => self.white,
            MeasurementKind::Visible => self.visible,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityOutcome {
    Connected,
    Failed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ServerResponse {
    pub limits: Option<LimitsUpdate>,
    pub update_available: bool,
}
