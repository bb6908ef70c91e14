//! Tests for controller exclusivity across the public construction path.

use benchbot::{
    config::Settings,
    controller::Controller,
    driver::SimulatedSmoothie,
    error::HwError,
    executor::HardwareExecutor,
    modules::SimulatedModuleBus,
};
use serial_test::serial;
use std::time::{Duration, Instant};

/// Settings for a "robot" whose lock file lives in `dir`.
fn robot_settings(dir: &tempfile::TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.hardware.is_robot = true;
    settings.hardware.lock_file = dir.path().join("hardware.lock");
    settings
}

fn build_controller(settings: &Settings) -> Result<Controller, HwError> {
    Controller::new(
        settings,
        Box::new(SimulatedSmoothie::new()),
        Box::new(SimulatedModuleBus::empty()),
    )
}

#[test]
#[serial]
fn test_second_controller_cannot_construct_while_one_is_alive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = robot_settings(&dir);

    let first = build_controller(&settings).expect("first controller");
    match build_controller(&settings) {
        Err(HwError::AlreadyLocked(_)) => {}
        other => panic!("expected AlreadyLocked, got {other:?}"),
    }
    drop(first);

    build_controller(&settings).expect("construction after release");
}

#[tokio::test]
#[serial]
async fn test_dropping_the_executor_releases_the_lock() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = robot_settings(&dir);

    let executor = {
        let settings = settings.clone();
        HardwareExecutor::spawn(move || build_controller(&settings))
    };
    executor.await_ready().await.expect("ready");

    match build_controller(&settings) {
        Err(HwError::AlreadyLocked(_)) => {}
        other => panic!("expected AlreadyLocked, got {other:?}"),
    }

    drop(executor);

    // The worker drops the controller asynchronously after the last handle
    // goes away; poll briefly rather than racing it.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match build_controller(&settings) {
            Ok(controller) => {
                drop(controller);
                break;
            }
            Err(HwError::AlreadyLocked(_)) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(other) => panic!("lock never released: {other}"),
        }
    }
}

#[tokio::test]
#[serial]
async fn test_executor_clones_share_one_controller() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = robot_settings(&dir);

    let executor = {
        let settings = settings.clone();
        HardwareExecutor::spawn(move || build_controller(&settings))
    };
    executor.await_ready().await.expect("ready");

    // A clone is a handle to the same worker, not a second controller; the
    // lock stays held and both handles work.
    let clone = executor.clone();
    clone.set_button_light(true).await.expect("light via clone");
    executor.home(None).await.expect("home via original");
    assert!(matches!(
        build_controller(&settings),
        Err(HwError::AlreadyLocked(_))
    ));
}
