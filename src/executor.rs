//! Asynchronous façade over the dedicated hardware thread.
//!
//! The motion driver is not safe for concurrent invocation, so every
//! hardware operation in the process funnels through one
//! [`HardwareExecutor`]: a single worker thread owns the [`Controller`] and
//! drains a command queue, executing jobs strictly in submission order with
//! no overlap. Callers submit a closure and await a oneshot reply.
//!
//! Construction is non-blocking: the worker starts building its controller
//! the moment the executor is spawned, and callers only block when they
//! call [`HardwareExecutor::await_ready`]. A construction failure is
//! reported to every waiter as [`HwError::Construction`]; it is never
//! retried here; fallback policy belongs to the boot sequencer.

use crate::controller::Controller;
use crate::error::{HwError, HwResult};
use crate::modules::ModuleHandle;
use crate::types::{Axis, InstrumentDescriptor, Mount, PositionMap};
use log::info;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// A unit of work executed on the dedicated thread.
type Job = Box<dyn FnOnce(&mut Controller) + Send + 'static>;

/// Construction state reported by the worker, exactly once.
#[derive(Clone, Debug)]
enum ReadyState {
    Pending,
    Ready,
    Failed(String),
}

/// Handle to the dedicated hardware thread. Cheap to clone; dropping the
/// last clone shuts the worker down, which in turn drops the controller and
/// releases the exclusivity lock.
#[derive(Clone, Debug)]
pub struct HardwareExecutor {
    job_tx: mpsc::UnboundedSender<Job>,
    ready_rx: watch::Receiver<ReadyState>,
}

impl HardwareExecutor {
    /// Spawn the worker thread and immediately start building its
    /// controller with `build`. Returns without waiting; use
    /// [`Self::await_ready`] to learn the outcome.
    pub fn spawn<F>(build: F) -> Self
    where
        F: FnOnce() -> HwResult<Controller> + Send + 'static,
    {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Pending);

        // Worker lifetime is tied to the channel: the loop ends when the
        // last executor clone drops the sender.
        std::thread::Builder::new()
            .name("hardware-worker".to_string())
            .spawn(move || {
                let mut controller = match build() {
                    Ok(controller) => {
                        let _ = ready_tx.send(ReadyState::Ready);
                        controller
                    }
                    Err(err) => {
                        let _ = ready_tx.send(ReadyState::Failed(err.to_string()));
                        return;
                    }
                };
                while let Some(job) = job_rx.blocking_recv() {
                    job(&mut controller);
                }
                info!("hardware worker shutting down");
            })
            .ok();

        Self { job_tx, ready_rx }
    }

    /// Wait until the worker reports that its controller finished
    /// constructing. `Ok` on success, [`HwError::Construction`] when the
    /// build failed or the worker died before reporting.
    pub async fn await_ready(&self) -> HwResult<()> {
        let mut ready_rx = self.ready_rx.clone();
        loop {
            {
                let state = ready_rx.borrow_and_update();
                match &*state {
                    ReadyState::Ready => return Ok(()),
                    ReadyState::Failed(message) => {
                        return Err(HwError::Construction(message.clone()))
                    }
                    ReadyState::Pending => {}
                }
            }
            if ready_rx.changed().await.is_err() {
                return Err(HwError::Construction(
                    "hardware worker exited before reporting readiness".to_string(),
                ));
            }
        }
    }

    /// [`Self::await_ready`] with an upper bound on the wait.
    pub async fn await_ready_timeout(&self, timeout: Duration) -> HwResult<()> {
        tokio::time::timeout(timeout, self.await_ready())
            .await
            .map_err(|_| {
                HwError::Construction(format!(
                    "hardware controller not ready within {timeout:?}"
                ))
            })?
    }

    /// Enqueue `op` for execution on the dedicated thread and return a
    /// future resolving to its result.
    ///
    /// The job is enqueued before this function returns, so call order
    /// equals execution order even when the returned futures are awaited
    /// later or out of order. Fails with [`HwError::WorkerGone`] when the
    /// worker has exited (including after a failed construction).
    pub fn submit<T, F>(&self, op: F) -> impl Future<Output = HwResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Controller) -> HwResult<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |controller| {
            let _ = reply_tx.send(op(controller));
        });
        let enqueued = self.job_tx.send(job).map_err(|_| HwError::WorkerGone);
        async move {
            enqueued?;
            reply_rx.await.map_err(|_| HwError::WorkerGone)?
        }
    }

    /// Whether the worker's controller runs the simulated backend.
    pub async fn is_simulated(&self) -> HwResult<bool> {
        self.submit(|controller| Ok(controller.is_simulated())).await
    }

    /// See [`Controller::move_to`].
    pub async fn move_to(
        &self,
        targets: PositionMap,
        home_flagged_axes: bool,
        speed: Option<f64>,
    ) -> HwResult<()> {
        self.submit(move |controller| controller.move_to(&targets, home_flagged_axes, speed))
            .await
    }

    /// See [`Controller::home`].
    pub async fn home(&self, axes: Option<Vec<Axis>>) -> HwResult<PositionMap> {
        self.submit(move |controller| controller.home(axes.as_deref()))
            .await
    }

    /// See [`Controller::fast_home`].
    pub async fn fast_home(&self, axis: Axis, margin: f64) -> HwResult<PositionMap> {
        self.submit(move |controller| controller.fast_home(axis, margin))
            .await
    }

    /// See [`Controller::get_attached_instruments`].
    pub async fn get_attached_instruments(
        &self,
        expected: HashMap<Mount, String>,
    ) -> HwResult<HashMap<Mount, InstrumentDescriptor>> {
        self.submit(move |controller| controller.get_attached_instruments(&expected))
            .await
    }

    /// See [`Controller::set_active_current`].
    pub async fn set_active_current(&self, axis: Axis, amps: f64) -> HwResult<()> {
        self.submit(move |controller| controller.set_active_current(axis, amps))
            .await
    }

    /// See [`Controller::set_pipette_speed`].
    pub async fn set_pipette_speed(&self, value: f64) -> HwResult<()> {
        self.submit(move |controller| controller.set_pipette_speed(value))
            .await
    }

    /// See [`Controller::set_button_light`].
    pub async fn set_button_light(&self, on: bool) -> HwResult<()> {
        self.submit(move |controller| controller.set_button_light(on))
            .await
    }

    /// See [`Controller::get_attached_modules`].
    pub async fn get_attached_modules(&self) -> HwResult<Vec<(String, String)>> {
        self.submit(|controller| controller.get_attached_modules())
            .await
    }

    /// See [`Controller::build_module`].
    pub async fn build_module(&self, port: String, model: String) -> HwResult<ModuleHandle> {
        self.submit(move |controller| controller.build_module(&port, &model))
            .await
    }

    /// See [`Controller::update_module`].
    pub async fn update_module(
        &self,
        module: ModuleHandle,
        firmware_path: PathBuf,
    ) -> HwResult<ModuleHandle> {
        self.submit(move |controller| controller.update_module(module, &firmware_path))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimulatedSmoothie;
    use crate::modules::SimulatedModuleBus;
    use std::sync::{Arc, Mutex};

    fn simulated_executor() -> HardwareExecutor {
        HardwareExecutor::spawn(|| {
            Ok(Controller::simulated(
                Box::new(SimulatedSmoothie::new()),
                Box::new(SimulatedModuleBus::empty()),
            ))
        })
    }

    #[tokio::test]
    async fn test_await_ready_succeeds_for_simulated_controller() {
        let executor = simulated_executor();
        executor.await_ready().await.expect("ready");
        // Idempotent.
        executor.await_ready().await.expect("ready again");
    }

    #[tokio::test]
    async fn test_construction_failure_surfaces_and_kills_submission() {
        let executor =
            HardwareExecutor::spawn(|| Err(HwError::Motion("no board".to_string())));
        match executor.await_ready().await {
            Err(HwError::Construction(message)) => assert!(message.contains("no board")),
            other => panic!("expected construction failure, got {other:?}"),
        }
        match executor.home(None).await {
            Err(HwError::WorkerGone) => {}
            other => panic!("expected WorkerGone, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_does_not_block_on_construction() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let started = std::time::Instant::now();
        let executor = HardwareExecutor::spawn(move || {
            let _ = release_rx.recv();
            Ok(Controller::simulated(
                Box::new(SimulatedSmoothie::new()),
                Box::new(SimulatedModuleBus::empty()),
            ))
        });
        assert!(started.elapsed() < Duration::from_millis(100));
        release_tx.send(()).expect("release worker");
        executor.await_ready().await.expect("ready");
    }

    #[tokio::test]
    async fn test_await_ready_timeout_reports_construction_error() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let executor = HardwareExecutor::spawn(move || {
            let _ = release_rx.recv();
            Ok(Controller::simulated(
                Box::new(SimulatedSmoothie::new()),
                Box::new(SimulatedModuleBus::empty()),
            ))
        });
        let result = executor
            .await_ready_timeout(Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(HwError::Construction(_))));
        release_tx.send(()).expect("release worker");
    }

    #[tokio::test]
    async fn test_jobs_execute_in_submission_order_without_overlap() {
        let executor = simulated_executor();
        executor.await_ready().await.expect("ready");

        let order = Arc::new(Mutex::new(Vec::new()));
        let overlapped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let busy = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut pending = Vec::new();
        for index in 0..50 {
            let order = Arc::clone(&order);
            let overlapped = Arc::clone(&overlapped);
            let busy = Arc::clone(&busy);
            pending.push(executor.submit(move |_controller| {
                if busy.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    overlapped.store(true, std::sync::atomic::Ordering::SeqCst);
                }
                order.lock().expect("order").push(index);
                busy.store(false, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }));
        }
        for job in pending {
            job.await.expect("job");
        }

        let order = order.lock().expect("order").clone();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
        assert!(!overlapped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_typed_wrappers_reach_the_driver() {
        let executor = simulated_executor();
        executor.await_ready().await.expect("ready");

        let positions = executor
            .home(Some(vec![Axis::Z, Axis::A]))
            .await
            .expect("home");
        assert_eq!(positions[&Axis::Z], 218.0);

        executor.set_button_light(true).await.expect("light");
        assert!(executor.is_simulated().await.expect("is_simulated"));
    }
}
