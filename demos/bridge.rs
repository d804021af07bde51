//! Runs both links: charger on a CAN interface, pendant on a serial port.
//!
//! Usage: `cargo run --example bridge -- [serial-port] [can-interface]`
//!
//! Set `RUST_LOG=charge_bridge=debug` for frame-level detail.

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use charge_bridge::can::CanSocketBus;
use charge_bridge::charging::{ChargingService, CommandTransmitter, LogSink, StopOnFault};
use charge_bridge::config::{BridgeConfig, to_std};
use charge_bridge::modbus::{ModbusRtuMaster, SerialPortOpener};
use charge_bridge::remote::RemoteControlPoller;
use inquire::{CustomType, Select};
use tracing::info;
use tracing_subscriber::EnvFilter;

const START: &str = "Start charging";
const STOP: &str = "Stop charging";
const CLEAR: &str = "Clear faults";
const STATUS: &str = "Show status";
const PENDANT: &str = "Show pendant";
const QUIT: &str = "Quit";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();
        Select::new("Select the pendant serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    let mut builder = BridgeConfig::builder().with_serial_port(port_name.clone());
    if let Some(interface) = env::args().nth(2) {
        builder = builder.with_can_interface(interface);
    }
    let config = builder.build().expect("Invalid configuration");
    info!("Using {} for the pendant and {} for the charger", port_name, config.can_interface);

    // Separate sockets for sending and receiving.
    let tx_bus = CanSocketBus::open(&config.can_interface, to_std(config.can_read_timeout))
        .expect("Failed to open CAN interface");
    let rx_bus = CanSocketBus::open(&config.can_interface, to_std(config.can_read_timeout))
        .expect("Failed to open CAN interface");

    let transmitter = Arc::new(
        CommandTransmitter::spawn(tx_bus, to_std(config.command_period), config.stop_burst)
            .expect("Failed to start command transmitter"),
    );
    let service = Arc::new(ChargingService::new(
        Arc::clone(&transmitter),
        StopOnFault::new(Arc::clone(&transmitter), LogSink),
    ));

    let cancel = Arc::new(AtomicBool::new(false));
    let receiver = service
        .spawn_receiver(rx_bus, Arc::clone(&cancel))
        .expect("Failed to start CAN receiver");

    let opener = SerialPortOpener::new(&port_name, config.baud_rate, to_std(config.serial_timeout));
    let master: ModbusRtuMaster<SerialPortOpener, 128> = ModbusRtuMaster::new(opener, config.slave_id);
    let mut poller = RemoteControlPoller::new(master, config.register_start, to_std(config.poll_interval));
    let pendant = poller.latest();
    let poll_cancel = Arc::clone(&cancel);
    let poll_thread = thread::spawn(move || {
        poller.run(&poll_cancel, |update| {
            info!(
                "Pendant: {} (mode {}, speed {:.2}, linear {:.2}, angular {:.2})",
                update.action, update.mode, update.speed, update.linear, update.angular
            );
        })
    });

    loop {
        let choice = Select::new("Action:", vec![START, STOP, CLEAR, STATUS, PENDANT, QUIT])
            .prompt()
            .unwrap_or(QUIT);

        match choice {
            START => {
                let voltage = CustomType::<f64>::new("Voltage (V):").prompt();
                let current = CustomType::<f64>::new("Current (A):").prompt();
                if let (Ok(voltage), Ok(current)) = (voltage, current) {
                    match service.start_charging(voltage, current) {
                        Ok(()) => println!("Charging at {voltage:.3}V / {current:.3}A"),
                        Err(e) => println!("Refused: {e}"),
                    }
                }
            }
            STOP => match service.stop_charging() {
                Ok(()) => println!("Stopped"),
                Err(e) => println!("Stop failed: {e}"),
            },
            CLEAR => match service.clear_faults() {
                Ok(()) => println!("Clear faults sent"),
                Err(e) => println!("Clear faults failed: {e}"),
            },
            STATUS => match service.snapshot() {
                Some(state) => {
                    println!(
                        "{} | {:.1}V {:.1}A {:.0}W | fault={} | {:.1}°C / {:.1}°C",
                        state.mode,
                        state.voltage,
                        state.current,
                        state.power_w(),
                        state.has_fault,
                        state.temperature_primary,
                        state.temperature_secondary
                    );
                    println!("{:#?}", state.stats());
                }
                None => println!("Nothing received from the charger yet"),
            },
            PENDANT => match pendant.get() {
                Some(state) => println!("{:#?}", state.to_update()),
                None => println!("Nothing received from the pendant yet"),
            },
            _ => break,
        }
    }

    if let Err(e) = service.stop_charging() {
        eprintln!("Failed to stop charging: {e}");
    }
    cancel.store(true, Ordering::SeqCst);
    transmitter.shutdown();
    let _ = receiver.join();
    let _ = poll_thread.join();
    info!("Bridge stopped");
}
