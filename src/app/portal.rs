use core::fmt::Write as _;

use embassy_executor::Spawner;
use embassy_net::{tcp::TcpSocket, IpListenEndpoint, Stack};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;
use heapless::String;
use log::{error, info, warn};
use provision::{
    portal::{
        http::{
            find_header_end, parse_head, Request, RequestError, REQUEST_BODY_MAX,
            REQUEST_HEAD_MAX,
        },
        Reply, RestartAfter,
    },
    AccessPointCredentials, ConfigService,
};

use super::{
    config::{HTTP_RESPONSE_MAX, HTTP_RW_BUF, PORTAL_HTTP_PORT, PORTAL_SOCKET_TIMEOUT_SECS},
    identity::DeviceIdentity,
    store::DeviceStore,
    wifi::{self, Radio},
};

/// Brings up the access point and serves the configuration form until a save
/// asks for a restart.
pub(crate) async fn run(
    spawner: Spawner,
    radio: Radio,
    identity: &DeviceIdentity,
    service: ConfigService,
    store: &mut DeviceStore,
) -> Result<RestartAfter, &'static str> {
    let Radio {
        mut controller,
        access_point,
        ..
    } = radio;

    let credentials = AccessPointCredentials::derive(identity).map_err(|err| {
        error!("portal: access point credentials err={}", err);
        "portal: identity unavailable"
    })?;
    wifi::start_access_point(&mut controller, &credentials)
        .await
        .map_err(|err| {
            error!("portal: access point start err={:?}", err);
            "portal: access point start failed"
        })?;

    let stack = wifi::access_point_stack(spawner, access_point);
    Ok(serve(stack, service, store).await)
}

async fn serve(
    stack: Stack<'static>,
    mut service: ConfigService,
    store: &mut DeviceStore,
) -> RestartAfter {
    stack.wait_config_up().await;
    if let Some(cfg) = stack.config_v4() {
        info!(
            "portal: listening on {}:{}",
            cfg.address.address(),
            PORTAL_HTTP_PORT
        );
    }

    let mut rx_buffer = [0u8; HTTP_RW_BUF];
    let mut tx_buffer = [0u8; HTTP_RW_BUF];
    let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
    socket.set_timeout(Some(Duration::from_secs(PORTAL_SOCKET_TIMEOUT_SECS)));

    loop {
        let accepted = socket
            .accept(IpListenEndpoint {
                addr: None,
                port: PORTAL_HTTP_PORT,
            })
            .await;
        if let Err(err) = accepted {
            warn!("portal: accept err={:?}", err);
            continue;
        }

        let restart = match handle_connection(&mut socket, &mut service, store).await {
            Ok(restart) => restart,
            Err(err) => {
                warn!("portal: request err={}", err);
                None
            }
        };

        let _ = socket.flush().await;
        Timer::after(Duration::from_millis(20)).await;
        socket.close();
        Timer::after(Duration::from_millis(20)).await;
        socket.abort();

        if let Some(restart) = restart {
            return restart;
        }
    }
}

async fn handle_connection(
    socket: &mut TcpSocket<'_>,
    service: &mut ConfigService,
    store: &mut DeviceStore,
) -> Result<Option<RestartAfter>, &'static str> {
    let mut buf = [0u8; REQUEST_HEAD_MAX + REQUEST_BODY_MAX];
    let mut filled = 0usize;
    while find_header_end(&buf[..filled]).is_none() {
        if filled >= REQUEST_HEAD_MAX {
            write_reply(socket, &Reply::rejected(RequestError::HeaderTooLarge)).await?;
            return Err("header too large");
        }
        let n = socket
            .read(&mut buf[filled..REQUEST_HEAD_MAX])
            .await
            .map_err(|_| "read")?;
        if n == 0 {
            return Err("eof");
        }
        filled += n;
    }

    let (body_start, content_length) = match parse_head(&buf[..filled]) {
        Ok(head) => (head.body_start, head.content_length),
        Err(err) => {
            write_reply(socket, &Reply::rejected(err)).await?;
            return Err("rejected request");
        }
    };

    let body_end = body_start + content_length;
    while filled < body_end {
        let n = socket
            .read(&mut buf[filled..body_end])
            .await
            .map_err(|_| "read body")?;
        if n == 0 {
            write_reply(socket, &Reply::rejected(RequestError::Malformed)).await?;
            return Err("incomplete body");
        }
        filled += n;
    }

    let head = parse_head(&buf[..filled]).map_err(|_| "request head")?;
    let request = Request {
        method: head.method,
        path: head.path,
        body: &buf[body_start..body_end],
    };
    let reply = service.handle(request, store);
    let restart = reply.restart;
    write_reply(socket, &reply).await?;
    Ok(restart)
}

async fn write_reply(socket: &mut TcpSocket<'_>, reply: &Reply<'_>) -> Result<(), &'static str> {
    let mut out: String<HTTP_RESPONSE_MAX> = String::new();
    if reply.write_to(&mut out).is_err() {
        out.clear();
        let _ = out.write_str(
            "HTTP/1.0 500 Internal Server Error\r\nConnection: close\r\n\r\nresponse too large",
        );
    }
    socket
        .write_all(out.as_bytes())
        .await
        .map_err(|_| "write")
}
