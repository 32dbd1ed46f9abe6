use core::net::Ipv4Addr;

use embassy_executor::Spawner;
use embassy_net::{Config, Ipv4Cidr, Runner, Stack, StackResources, StaticConfigV4};
use esp_hal::rng::Rng;
use esp_radio::wifi::WifiDevice;
use log::error;
use static_cell::StaticCell;

/// Interfaces of the node: the provisioning access point on a fixed address
/// and the station that leases one over DHCP.
pub struct Interfaces {
    pub access_point: Stack<'static>,
    pub station: Stack<'static>,
}

/// Builds both network stacks and spawns their runners.
pub fn bring_up(
    spawner: Spawner,
    ap_device: WifiDevice<'static>,
    sta_device: WifiDevice<'static>,
    gateway: Ipv4Addr,
) -> Interfaces {
    // DHCP server, captive DNS and the portal each hold a socket.
    static AP_RESOURCES: StaticCell<StackResources<6>> = StaticCell::new();
    // DNS plus one HTTP client socket at a time.
    static STA_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;

    let (access_point, ap_runner) = embassy_net::new(
        ap_device,
        Config::ipv4_static(StaticConfigV4 {
            address: Ipv4Cidr::new(gateway, 24),
            gateway: Some(gateway),
            dns_servers: Default::default(),
        }),
        AP_RESOURCES.init(StackResources::new()),
        seed,
    );
    let (station, sta_runner) = embassy_net::new(
        sta_device,
        Config::dhcpv4(Default::default()),
        STA_RESOURCES.init(StackResources::new()),
        seed ^ 0x5a5a_5a5a,
    );

    if spawner.spawn(run_stack(ap_runner)).is_err() || spawner.spawn(run_stack(sta_runner)).is_err() {
        error!("Net: failed to spawn stack runners");
    }

    Interfaces {
        access_point,
        station,
    }
}

#[embassy_executor::task(pool_size = 2)]
async fn run_stack(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}
