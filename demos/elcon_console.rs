//! ELCON Console Example
//!
//! A line-oriented front end for the charger controller. It stands in for the
//! graphical UI: commands typed on stdin become user intents, telemetry is
//! printed as it arrives.
//!
//! Commands:
//! - `refresh`             list adapters
//! - `device <n>`          select adapter
//! - `baud <n>`            select baud (0 = 1M, 1 = 500k, 2 = 250k, 3 = 125k)
//! - `connect`             connect / disconnect toggle
//! - `charge`              start / stop charging toggle
//! - `set <volts> <amps>`  update setpoints
//! - `quit`
//!
//! Run with `--virtual` to use an in-memory bus with a simulated charger.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use elcon_can::{
    Charger, ChargerConfig, ChargerEvent, CanFrame, GsUsbDriver, SetpointSource, SharedSetpoints,
    VirtualBus, VirtualDriver, ELCON_COMMAND_ID, ELCON_TELEMETRY_ID,
};

#[derive(Parser)]
#[command(about = "Control an ELCON charger over CAN")]
struct Args {
    /// Use an in-memory bus with a simulated charger instead of a GS-USB adapter
    #[arg(long = "virtual")]
    virtual_bus: bool,
    /// Target voltage in volts
    #[arg(short, long, default_value_t = 0.0)]
    voltage: f64,
    /// Requested current in amps
    #[arg(short, long, default_value_t = 0.0)]
    current: f64,
    /// Transmit period in milliseconds
    #[arg(long, default_value_t = 1000)]
    period_ms: u64,
}

fn main() {
    // Initialize logging
    env_logger::init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> elcon_can::Result<()> {
    let setpoints = Arc::new(SharedSetpoints::new(args.voltage, args.current));
    let config = ChargerConfig::default().with_transmit_period(Duration::from_millis(args.period_ms));
    let source = Arc::clone(&setpoints) as Arc<dyn SetpointSource>;

    let (mut charger, events) = if args.virtual_bus {
        let (driver, bus) = VirtualDriver::new(["virtual charger"]);
        simulate_charger(bus);
        Charger::start(driver, config, source)?
    } else {
        Charger::start(GsUsbDriver::new()?, config, source)?
    };

    thread::spawn(move || {
        for event in events {
            match event {
                ChargerEvent::Telemetry(t) => println!("<- {:.1} V  {:.1} A", t.voltage, t.current),
                ChargerEvent::ReceiveStalled { failures } => {
                    println!("!! {} consecutive read failures", failures)
                }
            }
        }
    });

    print_status(&mut charger);
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|e| elcon_can::LinkError::Read(e.to_string()))?;
        let mut words = line.split_whitespace();
        let ctl = charger.controller();

        let result = match (words.next(), words.next(), words.next()) {
            (Some("refresh"), _, _) => {
                for (i, name) in ctl.refresh_devices().iter().enumerate() {
                    println!("  [{}] {}", i, name);
                }
                Ok(())
            }
            (Some("device"), Some(n), _) => match n.parse() {
                Ok(n) => ctl.select_device(n),
                Err(_) => {
                    println!("device index must be a number");
                    Ok(())
                }
            },
            (Some("baud"), Some(n), _) => match n.parse() {
                Ok(n) => ctl.select_baud(n),
                Err(_) => {
                    println!("baud index must be a number");
                    Ok(())
                }
            },
            (Some("connect"), _, _) => ctl.toggle_connection(),
            (Some("charge"), _, _) => ctl.toggle_charging(),
            (Some("set"), Some(v), Some(a)) => match (v.parse::<f64>(), a.parse::<f64>()) {
                (Ok(v), Ok(a)) => {
                    setpoints.set(v, a);
                    Ok(())
                }
                _ => {
                    println!("usage: set <volts> <amps>");
                    Ok(())
                }
            },
            (Some("quit"), _, _) => break,
            (None, _, _) => Ok(()),
            _ => {
                println!("unknown command");
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("!! {}", e);
        }
        print_status(&mut charger);
    }

    charger.shutdown();
    Ok(())
}

fn print_status(charger: &mut Charger) {
    let ctl = charger.controller();
    let ui = ctl.affordances();
    print!(
        "[{:?} | device {} @ {} | {} | {}{}] > ",
        ctl.state(),
        ctl.selected_device(),
        ctl.selected_baud(),
        ui.connect_label,
        ui.charge_label,
        if ui.charge_available { "" } else { " (unavailable)" },
    );
    let _ = io::stdout().flush();
}

/// Answer every command frame with telemetry that follows the request
fn simulate_charger(bus: VirtualBus) {
    thread::spawn(move || loop {
        bus.wait_for_sent(1, Duration::from_secs(1));
        for frame in bus.take_sent() {
            if frame.id() != ELCON_COMMAND_ID || frame.data().len() < 5 {
                continue;
            }
            let data = frame.data();
            let reply = if data[4] == 0 {
                [data[0], data[1], data[2], data[3]]
            } else {
                [0, 0, 0, 0]
            };
            bus.inject(CanFrame::extended(ELCON_TELEMETRY_ID, &reply));
        }
    });
}
