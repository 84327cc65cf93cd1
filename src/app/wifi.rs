use embassy_executor::Spawner;
use embassy_net::{
    udp::{PacketMetadata, UdpSocket},
    IpAddress, IpEndpoint, Ipv4Address, Ipv4Cidr, Runner, Stack, StackResources, StaticConfigV4,
};
use embassy_time::{Duration, Instant, Timer};
use esp_hal::rng::Rng;
use esp_radio::wifi::{
    AccessPointConfig, AuthMethod, ClientConfig, Config as WifiRuntimeConfig, InternalWifiError,
    ModeConfig, ScanMethod, WifiController, WifiDevice, WifiError, WifiEvent,
};
use log::{debug, info, warn};
use provision::{
    portal::dhcp::{LeaseServer, DHCP_PACKET_MAX, DHCP_SERVER_PORT},
    AccessPointCredentials, CredentialRecord, NetworkLink,
};
use static_cell::StaticCell;

use super::config::{PORTAL_ADDRESS, PORTAL_CHANNEL, PORTAL_DHCP_LEASES, PORTAL_PREFIX_LEN};

const WIFI_RX_QUEUE_SIZE: usize = 3;
const WIFI_TX_QUEUE_SIZE: usize = 2;
const WIFI_STATIC_RX_BUF_NUM: u8 = 4;
const WIFI_DYNAMIC_RX_BUF_NUM: u16 = 8;
const WIFI_DYNAMIC_TX_BUF_NUM: u16 = 8;
const WIFI_RX_BA_WIN: u8 = 3;
const RECONNECT_BACKOFF_SECS: u64 = 3;

pub(crate) struct Radio {
    pub(crate) controller: WifiController<'static>,
    pub(crate) station: WifiDevice<'static>,
    pub(crate) access_point: WifiDevice<'static>,
}

pub(crate) fn setup(wifi: esp_hal::peripherals::WIFI<'static>) -> Result<Radio, &'static str> {
    static RADIO_CTRL: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();

    let radio_ctrl = esp_radio::init().map_err(|err| {
        warn!("wifi: esp_radio::init err={:?}", err);
        "wifi: esp_radio::init failed"
    })?;
    let radio_ctrl = RADIO_CTRL.init(radio_ctrl);
    let (controller, ifaces) = esp_radio::wifi::new(radio_ctrl, wifi, wifi_runtime_config())
        .map_err(|err| match err {
            WifiError::InvalidArguments => "wifi: init failed invalid_args",
            WifiError::Unsupported => "wifi: init failed unsupported",
            WifiError::NotInitialized => "wifi: init failed not_initialized",
            WifiError::InternalError(InternalWifiError::NoMem) => "wifi: init failed no_mem",
            _ => "wifi: init failed other",
        })?;

    Ok(Radio {
        controller,
        station: ifaces.sta,
        access_point: ifaces.ap,
    })
}

fn wifi_runtime_config() -> WifiRuntimeConfig {
    WifiRuntimeConfig::default()
        .with_rx_queue_size(WIFI_RX_QUEUE_SIZE)
        .with_tx_queue_size(WIFI_TX_QUEUE_SIZE)
        .with_static_rx_buf_num(WIFI_STATIC_RX_BUF_NUM)
        .with_dynamic_rx_buf_num(WIFI_DYNAMIC_RX_BUF_NUM)
        .with_dynamic_tx_buf_num(WIFI_DYNAMIC_TX_BUF_NUM)
        .with_ampdu_rx_enable(false)
        .with_ampdu_tx_enable(false)
        .with_rx_ba_win(WIFI_RX_BA_WIN)
}

/// Station mode seen through the provisioning controller.
pub(crate) struct StationLink<'a> {
    controller: &'a mut WifiController<'static>,
}

impl<'a> StationLink<'a> {
    pub(crate) fn new(controller: &'a mut WifiController<'static>) -> Self {
        Self { controller }
    }
}

impl NetworkLink for StationLink<'_> {
    type Error = WifiError;

    async fn begin(&mut self, ssid: &str, password: &str) -> Result<(), Self::Error> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::Wpa2Personal
        };
        let client = ClientConfig::default()
            .with_ssid(ssid.into())
            .with_password(password.into())
            .with_auth_method(auth_method)
            .with_scan_method(ScanMethod::AllChannels);
        self.controller.set_config(&ModeConfig::Client(client))?;

        if !matches!(self.controller.is_started(), Ok(true)) {
            self.controller.start_async().await?;
        }
        info!(
            "wifi: station started ssid={:?} password_len={}",
            ssid,
            password.len()
        );
        // Association finishes in the background; the controller polls for it.
        self.controller.connect()
    }

    fn is_connected(&mut self) -> bool {
        matches!(self.controller.is_connected(), Ok(true))
    }
}

/// Switches the radio from station to a WPA2 access point.
pub(crate) async fn start_access_point(
    controller: &mut WifiController<'static>,
    credentials: &AccessPointCredentials,
) -> Result<(), WifiError> {
    if matches!(controller.is_started(), Ok(true)) {
        let _ = controller.disconnect_async().await;
        controller.stop_async().await?;
    }

    let access_point = AccessPointConfig::default()
        .with_ssid(credentials.ssid.as_str().into())
        .with_password(credentials.passphrase.as_str().into())
        .with_auth_method(AuthMethod::Wpa2Personal)
        .with_channel(PORTAL_CHANNEL);
    controller.set_config(&ModeConfig::AccessPoint(access_point))?;
    controller.start_async().await?;

    info!(
        "wifi: access point ssid={} passphrase_len={}",
        credentials.ssid,
        credentials.passphrase.len()
    );
    Ok(())
}

fn stack_seed() -> u64 {
    let rng = Rng::new();
    (rng.random() as u64) << 32 | rng.random() as u64
}

/// Network stack for the access point at its fixed address, with a DHCP server
/// for joining clients.
pub(crate) fn access_point_stack(spawner: Spawner, device: WifiDevice<'static>) -> Stack<'static> {
    static STACK_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();

    let [a, b, c, d] = PORTAL_ADDRESS;
    let config = embassy_net::Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(Ipv4Address::new(a, b, c, d), PORTAL_PREFIX_LEN),
        gateway: None,
        dns_servers: Default::default(),
    });
    let (stack, runner) = embassy_net::new(
        device,
        config,
        STACK_RESOURCES.init(StackResources::<4>::new()),
        stack_seed(),
    );
    spawner.must_spawn(net_task(runner));
    spawner.must_spawn(dhcp_task(stack));
    stack
}

/// Steady state: the stored network accepted us. Brings up DHCP, logs the lease and
/// keeps the association alive.
pub(crate) async fn run_station(spawner: Spawner, radio: Radio, record: &CredentialRecord) -> ! {
    static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();

    let Radio {
        mut controller,
        station,
        ..
    } = radio;
    let (stack, runner) = embassy_net::new(
        station,
        embassy_net::Config::dhcpv4(Default::default()),
        STACK_RESOURCES.init(StackResources::<3>::new()),
        stack_seed(),
    );
    spawner.must_spawn(net_task(runner));

    stack.wait_config_up().await;
    if let Some(cfg) = stack.config_v4() {
        info!(
            "wifi: online ssid={:?} address={} mqtt_server={:?} mqtt_topic={:?}",
            record.ssid,
            cfg.address.address(),
            record.mqtt_server,
            record.mqtt_topic
        );
    }

    loop {
        controller.wait_for_event(WifiEvent::StaDisconnected).await;
        warn!("wifi: disconnected");
        loop {
            Timer::after(Duration::from_secs(RECONNECT_BACKOFF_SECS)).await;
            match controller.connect_async().await {
                Ok(()) => {
                    info!("wifi: reconnected");
                    break;
                }
                Err(err) => warn!("wifi: reconnect err={:?}", err),
            }
        }
    }
}

#[embassy_executor::task]
async fn dhcp_task(stack: Stack<'static>) {
    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0u8; 2 * DHCP_PACKET_MAX];
    let mut tx_buffer = [0u8; 2 * DHCP_PACKET_MAX];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    if let Err(err) = socket.bind(DHCP_SERVER_PORT) {
        warn!("dhcp: bind err={:?}", err);
        return;
    }

    let [a, b, c, d] = PORTAL_ADDRESS;
    let mut leases = LeaseServer::<_, PORTAL_DHCP_LEASES>::new(Ipv4Address::new(a, b, c, d), || {
        Instant::now().as_secs()
    });
    info!("dhcp: serving leases as {}", leases.address());

    let mut request = [0u8; DHCP_PACKET_MAX];
    let mut reply = [0u8; DHCP_PACKET_MAX];
    loop {
        let (len, meta) = match socket.recv_from(&mut request).await {
            Ok(received) => received,
            Err(err) => {
                warn!("dhcp: recv err={:?}", err);
                continue;
            }
        };
        let answer = match leases.answer(&request[..len], &mut reply) {
            Ok(Some(answer)) => answer,
            Ok(None) => continue,
            Err(err) => {
                debug!("dhcp: ignored datagram from {} err={}", meta.endpoint, err);
                continue;
            }
        };

        // Clients without an address yet only hear broadcasts.
        let to = if answer.broadcast || meta.endpoint.addr.is_unspecified() {
            IpEndpoint::new(IpAddress::Ipv4(Ipv4Address::BROADCAST), meta.endpoint.port)
        } else {
            meta.endpoint
        };
        if let Err(err) = socket.send_to(&reply[..answer.len], to).await {
            warn!("dhcp: send err={:?}", err);
        }
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}
