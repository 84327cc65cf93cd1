pub(crate) mod config;
mod identity;
mod portal;
mod serial;
mod store;
mod types;
mod wifi;

use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_time::{Delay, Duration, Timer};
use esp_hal::{
    timer::timg::TimerGroup,
    uart::{Config as UartConfig, Uart},
};
use log::{error, info, warn};
use provision::{
    AuthorizationGate, GateOutcome, Provisioning, ProvisioningController, RestartReason,
    SerialCommands,
};

use self::{
    config::{HEAP_BYTES, PROVISIONING, UART_BAUD},
    serial::ConsoleReader,
    types::Board,
};

pub(crate) fn run() -> ! {
    esp_println::logger::init_logger(config::log_level());

    let peripherals = esp_hal::init(esp_hal::Config::default());
    esp_alloc::heap_allocator!(size: HEAP_BYTES);
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let uart_cfg = UartConfig::default().with_baudrate(UART_BAUD);
    let uart = Uart::new(peripherals.UART0, uart_cfg)
        .expect("failed to init UART0")
        .with_rx(peripherals.GPIO3)
        .with_tx(peripherals.GPIO1)
        .into_async();

    let (store, flash) = match store::open(peripherals.FLASH) {
        Ok(opened) => opened,
        Err(err) => {
            error!("app: {}", err);
            halt_forever();
        }
    };

    let board = Board {
        uart,
        store,
        identity: identity::device_identity(flash),
        wifi: peripherals.WIFI,
    };

    let mut executor = esp_rtos::embassy::Executor::new();
    let executor = unsafe { make_static(&mut executor) };
    executor.run(move |spawner| {
        spawner.must_spawn(provision_task(spawner, board));
    });
}

#[embassy_executor::task]
async fn provision_task(spawner: Spawner, board: Board) {
    let Board {
        uart,
        mut store,
        identity,
        wifi,
    } = board;

    let mut commands = SerialCommands::new(ConsoleReader::new(uart));
    match AuthorizationGate::new()
        .run(&identity, &mut store, &mut commands)
        .await
    {
        Ok(GateOutcome::Authorized(_)) => {}
        Ok(GateOutcome::Restart(reason)) => {
            restart(reason, reason.delay_ms(&PROVISIONING)).await
        }
        Err(err) => {
            error!("app: boot aborted err={}", err);
            halt_forever();
        }
    }

    let mut radio = match wifi::setup(wifi) {
        Ok(radio) => radio,
        Err(err) => {
            error!("app: {}", err);
            halt_forever();
        }
    };

    let controller = ProvisioningController::new(PROVISIONING);
    let provisioning = {
        let mut link = wifi::StationLink::new(&mut radio.controller);
        controller.run(&mut store, &mut link, &mut Delay).await
    };

    match provisioning {
        Ok(Provisioning::Online(record)) => wifi::run_station(spawner, radio, &record).await,
        Ok(Provisioning::Portal(service)) => {
            let portal = portal::run(spawner, radio, &identity, service, &mut store);
            let outcome = match controller.config().portal_timeout_ms {
                Some(timeout_ms) => {
                    match select(portal, Timer::after(Duration::from_millis(timeout_ms as u64)))
                        .await
                    {
                        Either::First(outcome) => outcome,
                        Either::Second(()) => {
                            info!("app: portal timed out after {} ms", timeout_ms);
                            let reason = RestartReason::PortalTimeout;
                            restart(reason, reason.delay_ms(&PROVISIONING)).await
                        }
                    }
                }
                None => portal.await,
            };
            match outcome {
                Ok(after) => restart(after.reason, after.delay_ms).await,
                Err(err) => {
                    error!("app: {}", err);
                    halt_forever();
                }
            }
        }
        Err(err) => {
            error!("app: provisioning aborted err={}", err);
            halt_forever();
        }
    }
}

async fn restart(reason: RestartReason, delay_ms: u32) -> ! {
    warn!(
        "app: restarting reason={} delay_ms={}",
        reason.as_str(),
        delay_ms
    );
    Timer::after(Duration::from_millis(delay_ms as u64)).await;
    esp_hal::system::software_reset()
}

unsafe fn make_static<T>(value: &mut T) -> &'static mut T {
    unsafe { core::mem::transmute(value) }
}

fn halt_forever() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
