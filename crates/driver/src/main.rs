//! usbd-driver
//!
//! Installs the USB device driver on a simulated target and exercises
//! disconnect detection: every round detaches the device by tying the VBUS
//! sense input low, then re-attaches it by tying it high, and checks that
//! exactly one unmount and one mount were reported.

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::setup_logging;
use driver::config::{self, DriverSettings};
use driver::sim::{SimulatedHardware, SimulatedStack};
use driver::{
    ConnectionObserver, Port, SignalDestination, SignalId, SignalRouter, SignalSource, UsbDriver,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usbd-driver")]
#[command(
    author,
    version,
    about = "USB device driver lifecycle - disconnect detection on a simulated target"
)]
#[command(long_about = "
Installs the USB device driver against a simulated controller, emulates
detach/attach cycles by routing constant levels into the VBUS sense input,
and verifies the mount/unmount notifications.

EXAMPLES:
    # Run with default config
    usbd-driver

    # Run 100 rounds on the high-speed port
    usbd-driver --rounds 100 --port 1

    # Run with debug logging
    usbd-driver --log-level debug

CONFIGURATION:
    The driver looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbd-driver/driver.toml
    3. /etc/usbd-driver/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Number of detach/attach rounds
    #[arg(short, long, value_name = "N")]
    rounds: Option<u32>,

    /// USB peripheral to install on
    #[arg(short, long, value_name = "INDEX")]
    port: Option<u8>,
}

#[derive(Default)]
struct MountCounter {
    mounted: AtomicU32,
    unmounted: AtomicU32,
}

impl ConnectionObserver for MountCounter {
    fn on_mount(&self) {
        debug!("mount callback");
        self.mounted.fetch_add(1, Ordering::SeqCst);
    }

    fn on_unmount(&self) {
        debug!("unmount callback");
        self.unmounted.fetch_add(1, Ordering::SeqCst);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let settings = DriverSettings::default();
        let path = DriverSettings::default_path();
        settings
            .save(&path)
            .context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut settings = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        DriverSettings::load_or_default()
    };
    if let Some(rounds) = args.rounds {
        settings.simulation.rounds = rounds;
    }
    if let Some(port) = args.port {
        settings.driver.port = Port(port);
    }

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&settings.driver.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usbd-driver v{}", env!("CARGO_PKG_VERSION"));

    let (mounted, unmounted) = run_detection(&settings)?;
    println!(
        "{} rounds: {} mounted, {} unmounted",
        settings.simulation.rounds, mounted, unmounted
    );
    Ok(())
}

fn run_detection(settings: &DriverSettings) -> Result<(u32, u32)> {
    let sim = &settings.simulation;
    let high_speed_ports: &[Port] = if sim.high_speed {
        &[Port::HIGH_SPEED]
    } else {
        &[]
    };
    let peripherals = if sim.high_speed { 2 } else { 1 };
    let hw = SimulatedHardware::new(peripherals, sim.pin_count, high_speed_ports);

    let driver = UsbDriver::new(Arc::new(hw.clone()), SimulatedStack::new(hw.clone()))
        .with_stop_timeout(settings.task.stop_timeout());
    let counter = Arc::new(MountCounter::default());
    driver.connection().add_observer(counter.clone());

    let install = settings.install_config();
    let port = install.port;
    let sense = SignalDestination::VbusSense(port);
    let stage_timeout = Duration::from_millis(sim.stage_timeout_ms);

    // Host present before install
    if let Some(pin) = settings.phy.vbus_monitor_pin {
        hw.set_pin_level(SignalId(pin), true);
    }
    driver.install(install).context("Failed to install USB driver")?;
    if settings.phy.skip_setup {
        // Stand in for the external PHY setup
        hw.route_signal(SignalSource::ConstantOne, sense);
    }

    if !driver.connection().wait_stage_change(stage_timeout) {
        warn!("Device did not mount after install");
        driver.uninstall().context("Failed to uninstall USB driver")?;
        bail!("Device did not mount within {:?} after install", stage_timeout);
    }

    counter.mounted.store(0, Ordering::SeqCst);
    counter.unmounted.store(0, Ordering::SeqCst);

    let result = detach_attach_rounds(&driver, &hw, sense, sim);
    driver.uninstall().context("Failed to uninstall USB driver")?;
    result?;

    let mounted = counter.mounted.load(Ordering::SeqCst);
    let unmounted = counter.unmounted.load(Ordering::SeqCst);
    if mounted != unmounted || mounted != sim.rounds {
        bail!(
            "Expected {} mounts and unmounts, got {} mounted / {} unmounted",
            sim.rounds,
            mounted,
            unmounted
        );
    }
    Ok((mounted, unmounted))
}

fn detach_attach_rounds(
    driver: &UsbDriver<SimulatedHardware, SimulatedStack>,
    hw: &SimulatedHardware,
    sense: SignalDestination,
    sim: &config::SimulationSettings,
) -> Result<()> {
    let stage_timeout = Duration::from_millis(sim.stage_timeout_ms);
    for round in 1..=sim.rounds {
        debug!("round {}: bvalid(0)", round);
        hw.route_signal(SignalSource::ConstantZero, sense);
        if !driver.connection().wait_stage_change(stage_timeout) {
            bail!("Round {}: no unmount within {:?}", round, stage_timeout);
        }

        debug!("round {}: bvalid(1)", round);
        hw.route_signal(SignalSource::ConstantOne, sense);
        if !driver.connection().wait_stage_change(stage_timeout) {
            bail!("Round {}: no mount within {:?}", round, stage_timeout);
        }

        std::thread::sleep(Duration::from_millis(sim.round_delay_ms));
    }
    Ok(())
}
