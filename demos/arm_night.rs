//! Example: Night-arm the panel and follow the keypad sequence to the end.

use std::time::{Duration, Instant};

use texecom_serial_bridge::{ActiveTask, ArmMode, ArmStage, PanelOptions, SerialLink, Texecom};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let device = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let code = match args.next() {
        Some(code) => code,
        None => {
            eprintln!("Usage: arm_night <device> <access-code>");
            std::process::exit(2);
        }
    };

    let options = PanelOptions::builder().idle_text("The Cooper's").build();
    let port = SerialLink::open(&device)?;
    let mut panel = Texecom::new(port, options, Vec::new());

    let started = Instant::now();
    if !panel.arm(&code, ArmMode::Night, started)? {
        anyhow::bail!("Panel refused to start the arm sequence");
    }
    println!("Night arm started; driving the keypad...");

    // Alarm state follows the wired status outputs, which this demo does
    // not attach; read success off the task stages instead.
    let mut arm_requested = false;

    // The 15 s task budget plus the post-arm screen refresh.
    while started.elapsed() < Duration::from_secs(20) {
        panel.poll(Instant::now())?;
        for event in panel.drain_events() {
            println!("  {event:?}");
        }
        match panel.active_task() {
            Some(ActiveTask::Arm {
                stage: ArmStage::ArmRequested,
                ..
            }) => arm_requested = true,
            None if arm_requested => {
                println!("Panel accepted the arm request; exit timer running.");
                return Ok(());
            }
            _ => {}
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    anyhow::bail!("Arm sequence did not complete in time")
}
