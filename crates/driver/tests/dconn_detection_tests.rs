//! Integration tests for disconnect detection
//!
//! Emulates detach/attach by routing constant levels into the VBUS sense
//! input of a self-powered, VBUS-monitored device, including:
//! - Mount/unmount callback counts over repeated rounds
//! - Strict alternation of delivered transitions
//! - Monitor pin levels driving transitions
//! - Async consumption of the connection event stream

use common::test_utils::{STAGE_CHANGE_TIMEOUT, zero_interface_descriptor_set};
use driver::sim::{SimulatedHardware, SimulatedStack};
use driver::{
    ConnectionEvent, ConnectionObserver, InstallConfig, PhyConfig, Port, SignalDestination,
    SignalId, SignalRouter, SignalSource, UsbDriver,
};
use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DETACH_ROUNDS: u32 = 10;
const ROUND_DELAY: Duration = Duration::from_millis(10);
const MONITOR_PIN: SignalId = SignalId(4);

type SimDriver = UsbDriver<SimulatedHardware, SimulatedStack>;

#[derive(Default)]
struct MountCounter {
    mounted: AtomicU32,
    unmounted: AtomicU32,
    /// Names of the threads callbacks ran on
    threads: Mutex<Vec<String>>,
}

impl MountCounter {
    fn record_thread(&self) {
        let name = std::thread::current()
            .name()
            .unwrap_or_default()
            .to_string();
        self.threads.lock().unwrap().push(name);
    }

    fn reset(&self) {
        self.mounted.store(0, Ordering::SeqCst);
        self.unmounted.store(0, Ordering::SeqCst);
    }

    fn counts(&self) -> (u32, u32) {
        (
            self.mounted.load(Ordering::SeqCst),
            self.unmounted.load(Ordering::SeqCst),
        )
    }
}

impl ConnectionObserver for MountCounter {
    fn on_mount(&self) {
        self.record_thread();
        self.mounted.fetch_add(1, Ordering::SeqCst);
    }

    fn on_unmount(&self) {
        self.record_thread();
        self.unmounted.fetch_add(1, Ordering::SeqCst);
    }
}

fn self_powered_config(port: Port, high_speed: bool) -> InstallConfig {
    InstallConfig {
        port,
        phy: PhyConfig {
            skip_setup: false,
            self_powered: true,
            vbus_monitor_signal: Some(MONITOR_PIN),
        },
        descriptors: Some(zero_interface_descriptor_set(high_speed)),
        ..Default::default()
    }
}

/// Install with the host present and wait for the initial mount
fn install_attached(
    hw: SimulatedHardware,
    config: InstallConfig,
) -> (SimulatedHardware, Arc<MountCounter>, SimDriver) {
    common::setup_test_logging();
    let driver = UsbDriver::new(Arc::new(hw.clone()), SimulatedStack::new(hw.clone()));
    let counter = Arc::new(MountCounter::default());
    driver.connection().add_observer(counter.clone());

    hw.set_pin_level(MONITOR_PIN, true);
    driver.install(config).unwrap();
    assert!(driver.connection().wait_stage_change(STAGE_CHANGE_TIMEOUT));
    assert!(driver.connection().is_mounted());

    counter.reset();
    (hw, counter, driver)
}

fn detach_attach(driver: &SimDriver, hw: &SimulatedHardware, port: Port, rounds: u32) {
    let sense = SignalDestination::VbusSense(port);
    for _ in 0..rounds {
        hw.route_signal(SignalSource::ConstantZero, sense);
        assert!(driver.connection().wait_stage_change(STAGE_CHANGE_TIMEOUT));
        assert!(!driver.connection().is_mounted());

        hw.route_signal(SignalSource::ConstantOne, sense);
        assert!(driver.connection().wait_stage_change(STAGE_CHANGE_TIMEOUT));
        assert!(driver.connection().is_mounted());

        std::thread::sleep(ROUND_DELAY);
    }
}

#[test]
fn test_dconn_detection() {
    let hw = SimulatedHardware::new(1, 22, &[]);
    let (hw, counter, driver) = install_attached(hw, self_powered_config(Port::FULL_SPEED, false));

    detach_attach(&driver, &hw, Port::FULL_SPEED, DETACH_ROUNDS);
    driver.uninstall().unwrap();

    let (mounted, unmounted) = counter.counts();
    assert_eq!(unmounted, mounted);
    assert_eq!(mounted, DETACH_ROUNDS);
}

#[test]
fn test_dconn_detection_high_speed_port() {
    let hw = SimulatedHardware::new(2, 22, &[Port::HIGH_SPEED]);
    let (hw, counter, driver) = install_attached(hw, self_powered_config(Port::HIGH_SPEED, true));

    detach_attach(&driver, &hw, Port::HIGH_SPEED, DETACH_ROUNDS);
    driver.uninstall().unwrap();

    assert_eq!(counter.counts(), (DETACH_ROUNDS, DETACH_ROUNDS));
}

#[test]
fn test_transitions_alternate_starting_with_unmount() {
    let hw = SimulatedHardware::new(1, 22, &[]);
    let (hw, _counter, driver) = install_attached(hw, self_powered_config(Port::FULL_SPEED, false));
    let events = driver.connection().subscribe();

    detach_attach(&driver, &hw, Port::FULL_SPEED, 5);
    driver.uninstall().unwrap();

    let received: Vec<_> = std::iter::from_fn(|| events.try_recv()).collect();
    assert_eq!(received.len(), 10);
    for (i, event) in received.iter().enumerate() {
        let expected = if i % 2 == 0 {
            ConnectionEvent::Unmounted
        } else {
            ConnectionEvent::Mounted
        };
        assert_eq!(*event, expected, "event {} out of order", i);
    }
}

#[test]
fn test_callbacks_run_on_event_task() {
    let hw = SimulatedHardware::new(1, 22, &[]);
    let (hw, counter, driver) = install_attached(hw, self_powered_config(Port::FULL_SPEED, false));

    detach_attach(&driver, &hw, Port::FULL_SPEED, 2);
    driver.uninstall().unwrap();

    let threads = counter.threads.lock().unwrap();
    assert_eq!(threads.len(), 5);
    assert!(threads.iter().all(|name| name == "usbd-task-0"));
}

#[test]
fn test_monitor_pin_drives_transitions() {
    let hw = SimulatedHardware::new(1, 22, &[]);
    let (hw, counter, driver) = install_attached(hw, self_powered_config(Port::FULL_SPEED, false));

    hw.set_pin_level(MONITOR_PIN, false);
    assert!(driver.connection().wait_stage_change(STAGE_CHANGE_TIMEOUT));
    assert!(!driver.connection().is_mounted());

    hw.set_pin_level(MONITOR_PIN, true);
    assert!(driver.connection().wait_stage_change(STAGE_CHANGE_TIMEOUT));
    assert!(driver.connection().is_mounted());

    // Unrelated pins do nothing
    hw.set_pin_level(SignalId(5), true);
    assert!(!driver.connection().wait_stage_change(Duration::from_millis(50)));

    driver.uninstall().unwrap();
    assert_eq!(counter.counts(), (1, 1));
}

#[test]
fn test_self_powered_without_pin_reports_attached() {
    let hw = SimulatedHardware::new(1, 22, &[]);
    let config = InstallConfig {
        phy: PhyConfig {
            skip_setup: false,
            self_powered: true,
            vbus_monitor_signal: None,
        },
        ..self_powered_config(Port::FULL_SPEED, false)
    };
    let (hw, counter, driver) = install_attached(hw, config);

    hw.set_pin_level(MONITOR_PIN, false);
    assert!(!driver.connection().wait_stage_change(Duration::from_millis(50)));
    assert!(driver.connection().is_mounted());

    driver.uninstall().unwrap();
    assert_eq!(counter.counts(), (0, 0));
}

#[test]
fn test_uninstall_does_not_report_unmount() {
    let hw = SimulatedHardware::new(1, 22, &[]);
    let (_hw, counter, driver) = install_attached(hw, self_powered_config(Port::FULL_SPEED, false));

    driver.uninstall().unwrap();
    assert!(!driver.connection().is_mounted());
    assert_eq!(counter.counts(), (0, 0));
    assert_eq!(driver.connection().stats(), Default::default());
}

#[tokio::test]
async fn test_connection_events_async() {
    let hw = SimulatedHardware::new(1, 22, &[]);
    let (hw, _counter, driver) = install_attached(hw, self_powered_config(Port::FULL_SPEED, false));
    let events = driver.connection().subscribe();
    let sense = SignalDestination::VbusSense(Port::FULL_SPEED);

    hw.route_signal(SignalSource::ConstantZero, sense);
    let event = tokio::time::timeout(STAGE_CHANGE_TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, ConnectionEvent::Unmounted);

    hw.route_signal(SignalSource::ConstantOne, sense);
    let event = tokio::time::timeout(STAGE_CHANGE_TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, ConnectionEvent::Mounted);

    driver.uninstall().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_callback_count_matches_rounds(rounds in 1u32..6) {
        let hw = SimulatedHardware::new(1, 22, &[]);
        let (hw, counter, driver) =
            install_attached(hw, self_powered_config(Port::FULL_SPEED, false));

        detach_attach(&driver, &hw, Port::FULL_SPEED, rounds);
        driver.uninstall().unwrap();

        prop_assert_eq!(counter.counts(), (rounds, rounds));
        prop_assert!(!driver.connection().is_mounted());
    }
}
