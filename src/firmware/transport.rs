use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Ipv4Address, Stack};
use embassy_time::Duration;
use embedded_io_async::Write;
use log::{debug, error, warn};

use crate::error::TransportError;
use crate::http::{self, Url};
use crate::traits::{HttpResponse, UplinkTransport};

pub const SOCKET_BUFFER: usize = 4096;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves `host`, accepting dotted IPv4 literals without a DNS round trip.
pub async fn resolve(stack: Stack<'static>, host: &str) -> Result<IpAddress, TransportError> {
    if let Ok(address) = host.parse::<Ipv4Address>() {
        return Ok(IpAddress::Ipv4(address));
    }
    let addresses = stack
        .dns_query(host, DnsQueryType::A)
        .await
        .map_err(|e| {
            warn!("HTTP Client: DNS lookup for {host} failed: {e:?}");
            TransportError::Dns
        })?;
    addresses.first().copied().ok_or(TransportError::Dns)
}

/// Connects `socket` and sends the request head followed by `body`.
pub async fn send_request(
    stack: Stack<'static>,
    socket: &mut TcpSocket<'_>,
    method: &str,
    url: &Url<'_>,
    headers: &[(&str, &str)],
    body: Option<&[u8]>,
) -> Result<(), TransportError> {
    if !stack.is_config_up() {
        return Err(TransportError::NotConnected);
    }
    let address = resolve(stack, url.host).await?;

    socket.set_timeout(Some(SOCKET_TIMEOUT));
    debug!("HTTP Client: connecting to {address}:{}...", url.port);
    socket.connect((address, url.port)).await.map_err(|e| {
        error!("HTTP Client: connect error: {e:?}");
        TransportError::Connect
    })?;

    let head = http::request_head(method, url, headers, body.map(<[u8]>::len))?;
    socket
        .write_all(head.as_bytes())
        .await
        .map_err(|_| TransportError::Io)?;
    if let Some(body) = body {
        socket.write_all(body).await.map_err(|_| TransportError::Io)?;
    }
    socket.flush().await.map_err(|_| TransportError::Io)?;
    debug!("HTTP Client: {method} {} sent", url.path);
    Ok(())
}

/// [`UplinkTransport`] over the station interface.
pub struct HttpClient {
    stack: Stack<'static>,
}

impl HttpClient {
    pub fn new(stack: Stack<'static>) -> Self {
        Self { stack }
    }
}

impl UplinkTransport for HttpClient {
    async fn post(
        &mut self,
        url: &str,
        body: &[u8],
        headers: &[(&str, &str)],
        response: &mut [u8],
    ) -> Result<HttpResponse, TransportError> {
        let url = Url::parse(url)?;

        let mut rx_buffer = [0; SOCKET_BUFFER];
        let mut tx_buffer = [0; SOCKET_BUFFER];
        let mut socket = TcpSocket::new(self.stack, &mut rx_buffer, &mut tx_buffer);

        let result = match send_request(self.stack, &mut socket, "POST", &url, headers, Some(body))
            .await
        {
            Ok(()) => http::read_response(&mut socket, response).await,
            Err(e) => Err(e),
        };
        socket.close();
        result
    }
}
