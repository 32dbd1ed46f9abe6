//! Provisioning portal: the web form on the access point plus the DHCP and
//! captive DNS services that steer a joining phone to it.

use core::fmt::{Debug, Display};
use core::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use edge_http::Method;
use edge_http::io::Error as HttpError;
use edge_http::io::server::{Connection, Handler, Server};
use edge_nal::{TcpBind, UdpBind};
use edge_nal_embassy::{Tcp, TcpBuffers, Udp, UdpBuffers};
use embassy_executor::Spawner;
use embassy_net::Stack;
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use log::{debug, error, info, warn};
use static_cell::StaticCell;

use super::radio::{ACCESS_POINT_STATUS, RadioCommand, RadioCommands};
use crate::config;
use crate::error::ProvisioningError;
use crate::provisioning::CredentialIntake;
use crate::traits::ProvisioningService;

const HOME_HTML: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/templates/home.html"
));
const SAVED_HTML: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/templates/saved.html"
));

const HTTP_PORT: u16 = 80;
const BODY_MAX: usize = 512;

/// Probe paths phones use to detect a captive portal.
const CAPTIVE_PATHS: &[&str] = &["/generate_204", "/gen_204", "/ncsi.txt", "/connecttest.txt"];

struct PortalHandler {
    intake: &'static CredentialIntake<'static>,
}

impl Handler for PortalHandler {
    type Error<E>
        = HttpError<E>
    where
        E: Debug;

    async fn handle<T, const N: usize>(
        &self,
        _task_id: impl Display + Copy,
        conn: &mut Connection<'_, T, N>,
    ) -> Result<(), Self::Error<T::Error>>
    where
        T: Read + Write,
    {
        let headers = conn.headers()?;
        let method = headers.method;
        let path = headers.path;
        debug!("Portal: {method:?} {path}");

        if CAPTIVE_PATHS.contains(&path) {
            conn.initiate_response(302, Some("Found"), &[("Location", "/")])
                .await?;
            return Ok(());
        }

        match (method, path) {
            (Method::Get, "/") => {
                conn.initiate_response(
                    200,
                    Some("OK"),
                    &[("Content-Type", "text/html; charset=utf-8")],
                )
                .await?;
                conn.write_all(HOME_HTML.as_bytes()).await?;
            }
            (Method::Post, "/creds") => {
                let mut body = heapless::Vec::<u8, BODY_MAX>::new();
                let mut buf = [0u8; 128];
                loop {
                    let n = conn.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    if body.extend_from_slice(&buf[..n]).is_err() {
                        warn!("Portal: submission larger than {BODY_MAX} bytes");
                        conn.initiate_response(413, Some("Payload Too Large"), &[])
                            .await?;
                        return Ok(());
                    }
                }

                match self.intake.submit(&body) {
                    Ok(()) => {
                        conn.initiate_response(
                            200,
                            Some("OK"),
                            &[("Content-Type", "text/html; charset=utf-8")],
                        )
                        .await?;
                        conn.write_all(SAVED_HTML.as_bytes()).await?;
                    }
                    Err(ProvisioningError::Closed) => {
                        conn.initiate_response(409, Some("Conflict"), &[]).await?;
                    }
                    Err(e) => {
                        info!("Portal: submission rejected: {e}");
                        conn.initiate_response(
                            400,
                            Some("Bad Request"),
                            &[("Content-Type", "text/plain")],
                        )
                        .await?;
                        let mut message = heapless::String::<64>::new();
                        let _ = core::fmt::write(&mut message, format_args!("{e}"));
                        conn.write_all(message.as_bytes()).await?;
                    }
                }
            }
            _ => {
                conn.initiate_response(404, Some("Not Found"), &[]).await?;
            }
        }

        Ok(())
    }
}

#[embassy_executor::task]
async fn run_http_server(stack: Stack<'static>, intake: &'static CredentialIntake<'static>) {
    info!("Portal: HTTP server on port {HTTP_PORT}");

    static TCP_BUFFERS: StaticCell<TcpBuffers<1, 2048, 2048>> = StaticCell::new();
    let tcp = Tcp::new(stack, TCP_BUFFERS.init(TcpBuffers::new()));

    let mut acceptor = loop {
        match tcp
            .bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), HTTP_PORT))
            .await
        {
            Ok(acceptor) => break acceptor,
            Err(e) => {
                error!("Portal: bind failed: {e:?}");
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    };

    let handler = PortalHandler { intake };
    let mut server = Server::<1, 2048, 32>::new();
    loop {
        if let Err(e) = server.run(Some(50_000), &mut acceptor, &handler).await {
            error!("Portal: HTTP server error: {e:?}");
            Timer::after(Duration::from_millis(100)).await;
        }
    }
}

#[embassy_executor::task]
async fn run_dhcp(stack: Stack<'static>, gateway: Ipv4Addr) {
    use edge_dhcp::io::{self, DEFAULT_SERVER_PORT};
    use edge_dhcp::server::{Server, ServerOptions};

    let mut buf = [0u8; 1500];
    let mut gw_buf = [Ipv4Addr::UNSPECIFIED];

    let buffers = UdpBuffers::<3, 1024, 1024, 10>::new();
    let udp = Udp::new(stack, &buffers);
    let mut socket = match udp
        .bind(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            DEFAULT_SERVER_PORT,
        )))
        .await
    {
        Ok(socket) => socket,
        Err(e) => {
            error!("Portal: DHCP bind failed: {e:?}");
            return;
        }
    };

    loop {
        _ = io::server::run(
            &mut Server::<_, 64>::new_with_et(gateway),
            &ServerOptions::new(gateway, Some(&mut gw_buf)),
            &mut socket,
            &mut buf,
        )
        .await
        .inspect_err(|e| warn!("Portal: DHCP server error: {e:?}"));
        Timer::after(Duration::from_millis(500)).await;
    }
}

#[embassy_executor::task]
async fn run_captive_dns(stack: Stack<'static>, gateway: Ipv4Addr) {
    let mut tx_buf = [0u8; 1500];
    let mut rx_buf = [0u8; 1500];

    debug!(
        "Portal: captive DNS on port {}, answering {gateway}",
        config::CAPTIVE_DNS_PORT
    );
    let buffers = UdpBuffers::<3, 1024, 1024, 10>::new();
    let udp = Udp::new(stack, &buffers);

    loop {
        _ = edge_captive::io::run(
            &udp,
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config::CAPTIVE_DNS_PORT)),
            &mut tx_buf,
            &mut rx_buf,
            gateway,
            core::time::Duration::from_secs(60),
        )
        .await
        .inspect_err(|e| warn!("Portal: captive DNS error: {e:?}"));
        Timer::after(Duration::from_millis(500)).await;
    }
}

/// [`ProvisioningService`] backed by the access point and the portal tasks.
pub struct PortalService {
    spawner: Spawner,
    stack: Stack<'static>,
    gateway: Ipv4Addr,
    commands: &'static RadioCommands,
    intake: &'static CredentialIntake<'static>,
    services_spawned: bool,
}

impl PortalService {
    pub fn new(
        spawner: Spawner,
        stack: Stack<'static>,
        gateway: Ipv4Addr,
        commands: &'static RadioCommands,
        intake: &'static CredentialIntake<'static>,
    ) -> Self {
        Self {
            spawner,
            stack,
            gateway,
            commands,
            intake,
            services_spawned: false,
        }
    }

    fn spawn_services(&mut self) -> Result<(), ProvisioningError> {
        if self.services_spawned {
            return Ok(());
        }
        let spawned = self.spawner.spawn(run_dhcp(self.stack, self.gateway)).is_ok()
            && self
                .spawner
                .spawn(run_captive_dns(self.stack, self.gateway))
                .is_ok()
            && self
                .spawner
                .spawn(run_http_server(self.stack, self.intake))
                .is_ok();
        if !spawned {
            error!("Portal: failed to spawn portal tasks");
            return Err(ProvisioningError::ServiceUnavailable);
        }
        self.services_spawned = true;
        Ok(())
    }
}

impl ProvisioningService for PortalService {
    async fn start(&mut self) -> Result<(), ProvisioningError> {
        ACCESS_POINT_STATUS.reset();
        self.commands.send(RadioCommand::StartAccessPoint).await;
        if !ACCESS_POINT_STATUS.wait().await {
            return Err(ProvisioningError::ServiceUnavailable);
        }
        self.spawn_services()?;
        self.intake.open();

        info!("Provisioning portal ready");
        info!("1. Connect to the AP: `{}`", config::ap_ssid());
        info!("2. Navigate to: http://{}/", self.gateway);
        Ok(())
    }

    async fn stop(&mut self) {
        self.intake.close();
        // Give the HTTP handler time to send the saved page before dropping AP
        Timer::after(Duration::from_secs(2)).await;
        self.commands.send(RadioCommand::Stop).await;
        debug!("Portal: stopped");
    }
}
