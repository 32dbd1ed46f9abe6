//! One measurement upload per boot and the interpretation of the collector's
//! answer.

use core::fmt::Write;

use heapless::String;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::error::{TransportError, UplinkError};
use crate::model::{LimitsUpdate, Measurement, Range, ServerResponse, ThresholdLimits};
use crate::traits::{CredentialStore, UplinkTransport};

pub const PAYLOAD_CAPACITY: usize = 256;
pub const RESPONSE_CAPACITY: usize = 1024;

#[derive(Debug, Default, Deserialize)]
struct WireLimits {
    #[serde(default)]
    moisture: Option<[f64; 2]>,
    #[serde(default)]
    temperature: Option<[f64; 2]>,
    #[serde(default)]
    humidity: Option<[f64; 2]>,
    #[serde(default)]
    pressure: Option<[f64; 2]>,
    #[serde(default)]
    white: Option<[f64; 2]>,
    #[serde(default)]
    visible: Option<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    limits: Option<WireLimits>,
    #[serde(default, rename = "updateAvailable")]
    update_available: Option<bool>,
}

fn range(pair: Option<[f64; 2]>) -> Option<Range> {
    pair.map(|[min, max]| Range::new(min, max))
}

/// Serializes `measurement` as the compact JSON body of the upload.
pub fn encode_measurement(
    measurement: &Measurement,
) -> Result<String<PAYLOAD_CAPACITY>, UplinkError> {
    let mut body = String::new();
    write!(
        body,
        "{{\"moisture\":{:.2},\"temperature\":{:.2},\"humidity\":{:.2},\"pressure\":{:.2},\"white\":{:.5},\"visible\":{:.5}}}",
        measurement.moisture,
        measurement.temperature,
        measurement.humidity,
        measurement.pressure,
        measurement.white,
        measurement.visible,
    )
    .map_err(|_| UplinkError::PayloadTooLarge)?;
    Ok(body)
}

/// Parses a 2xx body. An empty body carries neither limits nor an update.
pub fn parse_response(body: &[u8]) -> Result<ServerResponse, UplinkError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ServerResponse::default());
    }
    let (wire, _) = serde_json_core::from_slice::<WireResponse>(body)
        .map_err(|_| UplinkError::MalformedResponse)?;

    let limits = wire.limits.map(|limits| LimitsUpdate {
        moisture: range(limits.moisture),
        temperature: range(limits.temperature),
        humidity: range(limits.humidity),
        pressure: range(limits.pressure),
        white: range(limits.white),
        visible: range(limits.visible),
    });

    Ok(ServerResponse {
        limits,
        update_available: wire.update_available.unwrap_or(false),
    })
}

pub struct UplinkSession<'a, T, S> {
    transport: &'a mut T,
    store: &'a mut S,
    url: &'a str,
}

impl<'a, T, S> UplinkSession<'a, T, S>
where
    T: UplinkTransport,
    S: CredentialStore,
{
    pub fn new(transport: &'a mut T, store: &'a mut S, url: &'a str) -> Self {
        Self {
            transport,
            store,
            url,
        }
    }

    /// Posts `measurement` and applies the limits carried by the answer.
    /// Nothing is written to the store unless the answer was parsed.
    pub async fn upload(
        &mut self,
        measurement: &Measurement,
        connected: bool,
    ) -> Result<ServerResponse, UplinkError> {
        if !connected {
            return Err(TransportError::NotConnected.into());
        }

        let body = encode_measurement(measurement)?;
        debug!("Uplink: POST {} {}", self.url, body);

        let headers = [
            ("Content-Type", "application/json"),
            ("Version", measurement.version),
        ];
        let mut buf = [0u8; RESPONSE_CAPACITY];
        let response = self
            .transport
            .post(self.url, body.as_bytes(), &headers, &mut buf)
            .await?;
        if !response.is_success() {
            warn!("Uplink: collector answered {}", response.status);
            return Err(TransportError::Status(response.status).into());
        }

        let parsed = parse_response(&buf[..response.body_len])?;
        info!(
            "Uplink: accepted, limits: {}, update available: {}",
            parsed.limits.is_some(),
            parsed.update_available
        );

        if let Some(update) = parsed.limits.filter(|update| !update.is_empty()) {
            self.apply_limits(&update).await;
        }
        Ok(parsed)
    }

    async fn apply_limits(&mut self, update: &LimitsUpdate) {
        let mut limits = match self.store.get_limits().await {
            Ok(stored) => stored.unwrap_or(ThresholdLimits::UNBOUNDED),
            Err(e) => {
                // Merging into defaults would clobber ranges we could not read.
                warn!("Uplink: stored limits unreadable, update dropped: {e}");
                return;
            }
        };
        let replaced = limits.merge(update);
        match self.store.set_limits(&limits).await {
            Ok(()) => debug!("Uplink: {replaced} limit ranges updated"),
            Err(e) => warn!("Uplink: could not persist limits: {e}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::config::FIRMWARE_VERSION;
    use crate::connectivity::tests::MemoryStore;
    use crate::traits::HttpResponse;

    /// Records the request and replies with a canned status and body.
    pub(crate) struct CannedTransport {
        pub status: u16,
        pub body: &'static str,
        pub error: Option<TransportError>,
        pub requests: Vec<(String<128>, std::string::String, Vec<(std::string::String, std::string::String)>)>,
    }

    impl CannedTransport {
        pub(crate) fn new(status: u16, body: &'static str) -> Self {
            Self {
                status,
                body,
                error: None,
                requests: Vec::new(),
            }
        }
    }

    impl UplinkTransport for CannedTransport {
        async fn post(
            &mut self,
            url: &str,
            body: &[u8],
            headers: &[(&str, &str)],
            response: &mut [u8],
        ) -> Result<HttpResponse, TransportError> {
            self.requests.push((
                String::try_from(url).unwrap(),
                std::string::String::from_utf8(body.to_vec()).unwrap(),
                headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ));
            if let Some(e) = self.error {
                return Err(e);
            }
            response[..self.body.len()].copy_from_slice(self.body.as_bytes());
            Ok(HttpResponse {
                status: self.status,
                body_len: self.body.len(),
            })
        }
    }

    pub(crate) fn sample_measurement() -> Measurement {
        Measurement {
            moisture: 42.5,
            temperature: 21.3,
            humidity: 55.0,
            pressure: 1013.2,
            white: 120.5,
            visible: 98.7,
            version: FIRMWARE_VERSION,
        }
    }

    fn stored_limits() -> ThresholdLimits {
        ThresholdLimits {
            moisture: Range::new(20.0, 80.0),
            temperature: Range::new(-5.0, 35.0),
            humidity: Range::new(20.0, 80.0),
            pressure: Range::new(950.0, 1050.0),
            white: Range::new(0.0, 500.0),
            visible: Range::new(0.0, 400.0),
        }
    }

    const URL: &str = "http://collector/api/measurements";

    #[test]
    fn payload_uses_two_and_five_decimals() {
        let body = encode_measurement(&sample_measurement()).unwrap();
        assert_eq!(
            body.as_str(),
            r#"{"moisture":42.50,"temperature":21.30,"humidity":55.00,"pressure":1013.20,"white":120.50000,"visible":98.70000}"#
        );
    }

    #[test]
    fn request_carries_json_and_version_headers() {
        let mut transport = CannedTransport::new(200, "{}");
        let mut store = MemoryStore::default();
        block_on(UplinkSession::new(&mut transport, &mut store, URL).upload(&sample_measurement(), true))
            .unwrap();

        let (url, body, headers) = &transport.requests[0];
        assert_eq!(url.as_str(), URL);
        assert!(body.starts_with(r#"{"moisture":42.50,"#));
        assert!(headers.contains(&("Content-Type".into(), "application/json".into())));
        assert!(headers.contains(&("Version".into(), FIRMWARE_VERSION.into())));
    }

    #[test]
    fn partial_response_updates_moisture_only() {
        let mut transport = CannedTransport::new(
            200,
            r#"{"limits":{"moisture":[10,90]},"updateAvailable":false}"#,
        );
        let mut store = MemoryStore {
            limits: Some(stored_limits()),
            ..Default::default()
        };

        let response = block_on(
            UplinkSession::new(&mut transport, &mut store, URL).upload(&sample_measurement(), true),
        )
        .unwrap();

        assert_eq!(
            response,
            ServerResponse {
                limits: Some(LimitsUpdate {
                    moisture: Some(Range::new(10.0, 90.0)),
                    ..Default::default()
                }),
                update_available: false,
            }
        );
        let expected = ThresholdLimits {
            moisture: Range::new(10.0, 90.0),
            ..stored_limits()
        };
        assert_eq!(store.limits, Some(expected));
        assert_eq!(store.limits_writes, 1);
    }

    #[test]
    fn full_response_replaces_every_range() {
        let mut transport = CannedTransport::new(
            200,
            r#"{"limits":{"moisture":[1,2],"temperature":[3,4],"humidity":[5,6],"pressure":[7,8],"white":[9,10],"visible":[11,12.5]},"updateAvailable":true}"#,
        );
        let mut store = MemoryStore {
            limits: Some(stored_limits()),
            ..Default::default()
        };

        let response = block_on(
            UplinkSession::new(&mut transport, &mut store, URL).upload(&sample_measurement(), true),
        )
        .unwrap();

        assert!(response.update_available);
        assert_eq!(
            store.limits,
            Some(ThresholdLimits {
                moisture: Range::new(1.0, 2.0),
                temperature: Range::new(3.0, 4.0),
                humidity: Range::new(5.0, 6.0),
                pressure: Range::new(7.0, 8.0),
                white: Range::new(9.0, 10.0),
                visible: Range::new(11.0, 12.5),
            })
        );
    }

    #[test]
    fn first_limits_merge_into_unbounded_record() {
        let mut transport = CannedTransport::new(200, r#"{"limits":{"pressure":[900,1100]}}"#);
        let mut store = MemoryStore::default();

        block_on(UplinkSession::new(&mut transport, &mut store, URL).upload(&sample_measurement(), true))
            .unwrap();

        let limits = store.limits.unwrap();
        assert_eq!(limits.pressure, Range::new(900.0, 1100.0));
        assert_eq!(limits.moisture, Range::UNBOUNDED);
    }

    #[test]
    fn non_success_status_is_a_transport_error() {
        let mut transport = CannedTransport::new(500, r#"{"limits":{"moisture":[10,90]}}"#);
        let mut store = MemoryStore::default();

        let result = block_on(
            UplinkSession::new(&mut transport, &mut store, URL).upload(&sample_measurement(), true),
        );

        assert_eq!(result, Err(UplinkError::Transport(TransportError::Status(500))));
        assert_eq!(store.limits_writes, 0);
    }

    #[test]
    fn transport_failure_is_surfaced_without_retry() {
        let mut transport = CannedTransport::new(200, "{}");
        transport.error = Some(TransportError::Connect);
        let mut store = MemoryStore::default();

        let result = block_on(
            UplinkSession::new(&mut transport, &mut store, URL).upload(&sample_measurement(), true),
        );

        assert_eq!(result, Err(UplinkError::Transport(TransportError::Connect)));
        assert_eq!(transport.requests.len(), 1);
    }

    #[test]
    fn disconnected_upload_does_no_io() {
        let mut transport = CannedTransport::new(200, "{}");
        let mut store = MemoryStore::default();

        let result = block_on(
            UplinkSession::new(&mut transport, &mut store, URL).upload(&sample_measurement(), false),
        );

        assert_eq!(result, Err(UplinkError::Transport(TransportError::NotConnected)));
        assert!(transport.requests.is_empty());
    }

    #[test]
    fn malformed_body_leaves_store_untouched() {
        for body in [
            "not json",
            r#"{"limits":{"moisture":[10]}}"#,
            r#"{"limits":{"moisture":[10,20,30]}}"#,
            r#"{"limits":{"moisture":"10-90"}}"#,
            r#"{"updateAvailable":"yes"}"#,
        ] {
            let mut transport = CannedTransport::new(200, body);
            let mut store = MemoryStore::default();
            let result = block_on(
                UplinkSession::new(&mut transport, &mut store, URL)
                    .upload(&sample_measurement(), true),
            );
            assert_eq!(result, Err(UplinkError::MalformedResponse), "body: {body}");
            assert_eq!(store.limits_writes, 0);
        }
    }

    #[test]
    fn unknown_keys_and_empty_bodies_are_tolerated() {
        assert_eq!(
            parse_response(br#"{"status":"ok","limits":{"light":[1,2]},"updateAvailable":true}"#),
            Ok(ServerResponse {
                limits: Some(LimitsUpdate::default()),
                update_available: true,
            })
        );
        assert_eq!(parse_response(b""), Ok(ServerResponse::default()));
        assert_eq!(parse_response(b"{}"), Ok(ServerResponse::default()));
    }

    #[test]
    fn empty_limits_object_writes_nothing() {
        let mut transport = CannedTransport::new(200, r#"{"limits":{}}"#);
        let mut store = MemoryStore::default();

        block_on(UplinkSession::new(&mut transport, &mut store, URL).upload(&sample_measurement(), true))
            .unwrap();

        assert_eq!(store.limits_writes, 0);
    }

    #[test]
    fn store_write_failure_does_not_fail_upload() {
        let mut transport = CannedTransport::new(200, r#"{"limits":{"moisture":[10,90]}}"#);
        let mut store = MemoryStore {
            fail_writes: true,
            ..Default::default()
        };

        let response = block_on(
            UplinkSession::new(&mut transport, &mut store, URL).upload(&sample_measurement(), true),
        );

        assert!(response.is_ok());
    }
}
