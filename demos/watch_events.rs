//! Example: Connect to a Texecom panel and print events as they happen.

use std::time::{Duration, Instant};

use texecom_serial_bridge::{AlarmState, PanelEvent, PanelOptions, SerialLink, Texecom};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let device = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    let options = PanelOptions::builder().idle_text("The Cooper's").build();
    let port = SerialLink::open(&device)?;
    let mut panel = Texecom::new(port, options, Vec::new());

    println!("Watching panel on {device} (Ctrl+C to stop)...\n");

    loop {
        panel.poll(Instant::now())?;
        for event in panel.drain_events() {
            match event {
                PanelEvent::AlarmStateChanged { state } => {
                    println!("Alarm state: {state}");
                    if state == AlarmState::Triggered {
                        if let Some(zone) = panel.triggered_zone() {
                            println!("  first zone tripped: {zone}");
                        }
                    }
                }
                PanelEvent::ZoneStateChanged { zone, status } => {
                    println!("Zone {zone:3}: {status}");
                }
                PanelEvent::AlarmTriggered { zone } => {
                    println!("!! ALARM TRIGGERED by zone {zone}");
                }
                PanelEvent::ReadyChanged { ready } => {
                    println!("Ready to arm: {ready}");
                }
                PanelEvent::Message { text } => {
                    println!("Panel says: {text}");
                }
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
