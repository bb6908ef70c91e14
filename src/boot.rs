//! Boot orchestration.
//!
//! [`initialize`] takes the process from nothing to a ready-to-use
//! [`HardwareExecutor`]:
//!
//! 1. Backend selection: the simulate switch picks the virtual smoothie
//!    unconditionally, skipping firmware resolution and the host readiness
//!    notification.
//! 2. Firmware resolution (real path): a missing image is fatal here;
//!    there is nothing to fall back to before a backend exists.
//! 3. Host readiness notification (real path): `READY=1` to the
//!    supervising service. This signals "software started", not "hardware
//!    ready"; it fires before the controller finishes constructing.
//! 4. Readiness wait: the real controller is built on the dedicated
//!    thread without blocking the caller. A construction failure is logged
//!    and the boot falls back to the simulated backend; it never aborts the
//!    process.
//! 5. Heartbeat and homing: the indicator blinks while the carriages home
//!    (or for however briefly homing is skipped), and the light is forced
//!    to steady on once the heartbeat is cancelled.
//!
//! The fallback leaves the process in a degraded, simulated mode. That is
//! logged at error level and queryable through
//! [`HardwareExecutor::is_simulated`].

use crate::config::Settings;
use crate::controller::Controller;
use crate::driver::SimulatedSmoothie;
use crate::error::HwResult;
use crate::executor::HardwareExecutor;
use crate::firmware;
use crate::modules::SimulatedModuleBus;
use crate::types::Axis;
use log::{debug, error, info};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[cfg(feature = "instrument_serial")]
use crate::driver::smoothie::SmoothieDriver;
#[cfg(feature = "instrument_serial")]
use crate::modules::DeckModuleBus;

/// Repeating indicator toggle running beside a blocking boot step.
///
/// Cancellation is cooperative and lands at a toggle boundary: the light
/// commands themselves are serialized through the executor and never
/// interrupted mid-command. [`Heartbeat::stop`] then forces the indicator
/// to steady on; cancellation can leave either phase, so the final state
/// is set deterministically rather than left to chance.
pub struct Heartbeat {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
    executor: HardwareExecutor,
}

impl Heartbeat {
    /// Start blinking through `executor`, `period` per light phase.
    pub fn start(executor: HardwareExecutor, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let blinker = executor.clone();
        let task = tokio::spawn(async move {
            let mut lit = true;
            loop {
                if blinker.set_button_light(lit).await.is_err() {
                    // Worker gone; nothing left to blink.
                    break;
                }
                lit = !lit;
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = &mut stop_rx => break,
                }
            }
        });
        Self {
            stop_tx,
            task,
            executor,
        }
    }

    /// Cancel at the next toggle boundary, then force the indicator on.
    pub async fn stop(self) -> HwResult<()> {
        let _ = self.stop_tx.send(());
        let _ = self.task.await;
        self.executor.set_button_light(true).await
    }
}

fn spawn_simulated() -> HardwareExecutor {
    HardwareExecutor::spawn(|| {
        Ok(Controller::simulated(
            Box::new(SimulatedSmoothie::new()),
            Box::new(SimulatedModuleBus::empty()),
        ))
    })
}

#[cfg(feature = "instrument_serial")]
fn spawn_real(settings: &Settings) -> HardwareExecutor {
    let settings = settings.clone();
    HardwareExecutor::spawn(move || {
        let driver = SmoothieDriver::new(&settings.hardware.port, settings.hardware.baud_rate);
        let modules = DeckModuleBus::new(settings.hardware.module_dev_dir.clone());
        Controller::new(&settings, Box::new(driver), Box::new(modules))
    })
}

#[cfg(not(feature = "instrument_serial"))]
fn spawn_real(_settings: &Settings) -> HardwareExecutor {
    HardwareExecutor::spawn(|| {
        Err(crate::error::HwError::FeatureNotEnabled(
            "instrument_serial".to_string(),
        ))
    })
}

/// Tell the supervising service the process has started.
fn notify_host_ready() {
    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        debug!("readiness notification not delivered: {err}");
    }
}

/// Bring the hardware up and return the executor handle for it.
///
/// A real controller that fails to construct is replaced by a simulated
/// one; the construction error is logged, never propagated. Firmware
/// resolution failure on the real path and homing failures are fatal.
pub async fn initialize(settings: &Settings) -> HwResult<HardwareExecutor> {
    let executor = if settings.boot.simulate {
        info!("initializing robot with the virtual smoothie backend");
        spawn_simulated()
    } else {
        let firmware = firmware::find_smoothie_firmware(settings)?;
        info!(
            "using smoothie firmware {} ({})",
            firmware.path.display(),
            firmware.version
        );
        notify_host_ready();
        let real = spawn_real(settings);
        match real.await_ready().await {
            Ok(()) => real,
            Err(err) => {
                error!("could not build hardware controller, forcing virtual: {err}");
                spawn_simulated()
            }
        }
    };
    executor.await_ready().await?;

    let heartbeat = Heartbeat::start(
        executor.clone(),
        Duration::from_millis(settings.boot.heartbeat_period_ms),
    );
    let home_result = if settings.boot.disable_home_on_boot {
        info!("home on boot disabled, skipping");
        Ok(())
    } else {
        info!("homing carriage axes");
        executor
            .home(Some(Axis::CARRIAGES.to_vec()))
            .await
            .map(|_| ())
    };
    // The heartbeat is cancelled and the light forced on before any homing
    // failure propagates.
    heartbeat.stop().await?;
    home_result?;

    Ok(executor)
}
