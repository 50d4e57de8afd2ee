// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use texecom_serial_bridge::{
    ArmMode, EventSender, FileCodeStore, PanelEvent, PanelOptions, SerialLink, Texecom,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "texecom2mqtt")]
#[command(about = "Bridge between a Texecom alarm panel and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    panel: PanelToml,
    mqtt: MqttToml,
}

#[derive(Debug, Deserialize)]
struct PanelToml {
    /// Serial device wired to the panel's com port, e.g. "/dev/ttyUSB0".
    device: String,
    /// First line of the panel's idle screen, used to recognize it.
    #[serde(default = "default_idle_text")]
    idle_text: String,
    /// User names by panel slot, for attributing keypad logins.
    #[serde(default)]
    users: Vec<String>,
    /// When set, confirmation keystrokes are withheld so sequences can be
    /// walked against a live panel without changing its state.
    #[serde(default)]
    debug_mode: bool,
    /// File the UDL code is persisted in. Optional; without it SET_UDL_CODE
    /// only lasts until restart.
    #[serde(default)]
    code_file: Option<String>,
    #[serde(default = "default_poll_interval")]
    poll_interval_ms: u64,
}

fn default_idle_text() -> String {
    "The Cooper's".to_string()
}
fn default_poll_interval() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
}

fn default_client_id() -> String {
    "texecom-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "texecom/cmd".to_string()
}
fn default_publish_topic() -> String {
    "texecom".to_string()
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Published messages all share the {now, op, ...} flat structure.

#[derive(Serialize)]
struct MqttStateEvent {
    now: u64,
    op: String,
    state: String,
}

#[derive(Serialize)]
struct MqttZoneEvent {
    now: u64,
    op: String,
    zone: u16,
    status: String,
}

#[derive(Serialize)]
struct MqttTriggerEvent {
    now: u64,
    op: String,
    zone: u16,
}

#[derive(Serialize)]
struct MqttReadyEvent {
    now: u64,
    op: String,
    ready: bool,
}

#[derive(Serialize)]
struct MqttMessageEvent {
    now: u64,
    op: String,
    text: String,
}

// CMD_ACK response
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
}

// Simple event with just {now, op}
#[derive(Serialize)]
struct MqttSimpleEvent {
    now: u64,
    op: String,
}

// Inbound command (subscribed)
#[derive(Deserialize)]
struct MqttCommand {
    op: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

// ---------------------------------------------------------------------------
// Panel commands queued into the poll loop
// ---------------------------------------------------------------------------

enum BridgeCommand {
    Arm {
        mode: ArmMode,
        code: String,
        src: Option<serde_json::Value>,
    },
    Disarm {
        code: String,
        src: Option<serde_json::Value>,
    },
    Status {
        src: Option<serde_json::Value>,
    },
    Test {
        text: String,
        src: Option<serde_json::Value>,
    },
    SetUdlCode {
        code: String,
        src: Option<serde_json::Value>,
    },
}

struct CmdOutcome {
    success: bool,
    src: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    success: bool,
    src: Option<serde_json::Value>,
) {
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK".to_string(),
        success,
        src,
    };
    publish_json(client, topic, &msg, false).await;
}

// ---------------------------------------------------------------------------
// Panel event → MQTT
// ---------------------------------------------------------------------------

async fn handle_panel_event(event: PanelEvent, client: &AsyncClient, topic: &str) {
    match event {
        PanelEvent::AlarmStateChanged { state } => {
            // Retained so subscribers see the current state on connect.
            let msg = MqttStateEvent {
                now: now_epoch_ms(),
                op: "ALARM_STATE".to_string(),
                state: state.as_str().to_string(),
            };
            publish_json(client, topic, &msg, true).await;
        }

        PanelEvent::ZoneStateChanged { zone, status } => {
            let msg = MqttZoneEvent {
                now: now_epoch_ms(),
                op: "ZONE_STATUS".to_string(),
                zone,
                status: status.as_str().to_string(),
            };
            publish_json(client, topic, &msg, false).await;
        }

        PanelEvent::AlarmTriggered { zone } => {
            error!("Alarm triggered by zone {zone}");
            let msg = MqttTriggerEvent {
                now: now_epoch_ms(),
                op: "ALARM_TRIGGERED".to_string(),
                zone,
            };
            publish_json(client, topic, &msg, false).await;
        }

        PanelEvent::ReadyChanged { ready } => {
            let msg = MqttReadyEvent {
                now: now_epoch_ms(),
                op: "READY".to_string(),
                ready,
            };
            publish_json(client, topic, &msg, false).await;
        }

        PanelEvent::Message { text } => {
            let msg = MqttMessageEvent {
                now: now_epoch_ms(),
                op: "MESSAGE".to_string(),
                text,
            };
            publish_json(client, topic, &msg, false).await;
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

async fn dispatch_command(
    payload_str: &str,
    cmd: MqttCommand,
    cmd_tx: &mpsc::UnboundedSender<BridgeCommand>,
    client: &AsyncClient,
    topic: &str,
) {
    // Echo the raw payload back in the CMD_ACK src field
    let src = serde_json::from_str::<serde_json::Value>(payload_str).ok();

    let bridge = match cmd.op.as_str() {
        "ARM_FULL" | "ARM_NIGHT" => {
            let Some(code) = cmd.code else {
                warn!("{}: missing code", cmd.op);
                publish_cmd_ack(client, topic, false, src).await;
                return;
            };
            let mode = if cmd.op == "ARM_FULL" {
                ArmMode::Full
            } else {
                ArmMode::Night
            };
            BridgeCommand::Arm { mode, code, src }
        }

        "DISARM" => {
            let Some(code) = cmd.code else {
                warn!("DISARM: missing code");
                publish_cmd_ack(client, topic, false, src).await;
                return;
            };
            BridgeCommand::Disarm { code, src }
        }

        "STATUS" => BridgeCommand::Status { src },

        "TEST" => BridgeCommand::Test {
            text: cmd.text.unwrap_or_default(),
            src,
        },

        "SET_UDL_CODE" => {
            let Some(code) = cmd.code else {
                warn!("SET_UDL_CODE: missing code");
                publish_cmd_ack(client, topic, false, src).await;
                return;
            };
            BridgeCommand::SetUdlCode { code, src }
        }

        other => {
            warn!("Unknown command: {other}");
            publish_cmd_ack(client, topic, false, src).await;
            return;
        }
    };

    // The poll loop executes it; the ack task publishes the outcome.
    if cmd_tx.send(bridge).is_err() {
        error!("Panel loop is gone; dropping command");
    }
}

/// Run one queued command against the panel, inside the poll loop.
fn run_command(
    panel: &mut Texecom<SerialLink, EventSender>,
    cmd: BridgeCommand,
    now: Instant,
) -> CmdOutcome {
    match cmd {
        BridgeCommand::Arm { mode, code, src } => {
            info!("Command: ARM_{}", mode.as_str());
            let success = panel.arm(&code, mode, now).unwrap_or_else(|e| {
                error!("Arm failed: {e}");
                false
            });
            CmdOutcome { success, src }
        }
        BridgeCommand::Disarm { code, src } => {
            info!("Command: DISARM");
            let success = panel.disarm(&code, now).unwrap_or_else(|e| {
                error!("Disarm failed: {e}");
                false
            });
            CmdOutcome { success, src }
        }
        BridgeCommand::Status { src } => {
            debug!("Command: STATUS");
            let success = match panel.send_test("STATUS", now) {
                Ok(()) => true,
                Err(e) => {
                    error!("Status request failed: {e}");
                    false
                }
            };
            CmdOutcome { success, src }
        }
        BridgeCommand::Test { text, src } => {
            info!("Command: TEST {text:?}");
            let success = match panel.send_test(&text, now) {
                Ok(()) => true,
                Err(e) => {
                    error!("Test command failed: {e}");
                    false
                }
            };
            CmdOutcome { success, src }
        }
        BridgeCommand::SetUdlCode { code, src } => {
            info!("Command: SET_UDL_CODE");
            let success = match panel.set_udl_code(&code) {
                Ok(()) => true,
                Err(e) => {
                    warn!("SET_UDL_CODE rejected: {e}");
                    false
                }
            };
            CmdOutcome { success, src }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or
    // RUST_LOG=texecom_serial_bridge=trace). Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt()
            .without_time()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    // Load config
    let config_text = std::fs::read_to_string(&cli.config).context("Failed to read config file")?;
    let config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;

    let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;
    let publish_topic = config.mqtt.publish_topic;
    let subscribe_topic = config.mqtt.subscribe_topic;
    let status_topic = format!("{publish_topic}/status");

    // Open the panel
    info!("Opening Texecom panel on {}", config.panel.device);
    let port = SerialLink::open(&config.panel.device).context("Failed to open serial device")?;
    let options = PanelOptions::builder()
        .idle_text(config.panel.idle_text)
        .users(config.panel.users)
        .debug_mode(config.panel.debug_mode)
        .build();

    let (event_tx, event_rx) = texecom_serial_bridge::event_channel(64);
    let mut panel = Texecom::new(port, options, event_tx);
    if let Some(path) = &config.panel.code_file {
        panel = panel.with_code_store(FileCodeStore::new(path));
    }

    // Set up MQTT
    let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
    mqtt_opts.set_keep_alive(Duration::from_secs(30));
    let offline = serde_json::to_string(&MqttSimpleEvent {
        now: now_epoch_ms(),
        op: "OFFLINE".to_string(),
    })?;
    mqtt_opts.set_last_will(LastWill::new(&status_topic, offline, QoS::AtLeastOnce, true));
    let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

    client
        .subscribe(&subscribe_topic, QoS::AtLeastOnce)
        .await
        .context("Failed to subscribe to MQTT topic")?;
    info!("MQTT: subscribed to {subscribe_topic}");

    publish_json(
        &client,
        &status_topic,
        &MqttSimpleEvent {
            now: now_epoch_ms(),
            op: "ONLINE".to_string(),
        },
        true,
    )
    .await;

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<BridgeCommand>();
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<CmdOutcome>();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Task 1: the panel poll loop, on a blocking thread. The driver is
    // synchronous; everything it needs happens inside poll().
    let poll_interval = Duration::from_millis(config.panel.poll_interval_ms);
    let panel_shutdown = shutdown_rx.clone();
    let panel_handle = tokio::task::spawn_blocking(move || {
        loop {
            if *panel_shutdown.borrow() {
                info!("Panel loop stopping");
                break;
            }
            let now = Instant::now();
            if let Err(e) = panel.poll(now) {
                error!("Panel poll failed: {e}");
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
            while let Ok(cmd) = cmd_rx.try_recv() {
                let outcome = run_command(&mut panel, cmd, now);
                if ack_tx.send(outcome).is_err() {
                    return;
                }
            }
            std::thread::sleep(poll_interval);
        }
    });

    // Task 2: panel events → MQTT
    let client_events = client.clone();
    let topic_events = publish_topic.clone();
    let event_handle = tokio::spawn(async move {
        let mut rx = event_rx;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    handle_panel_event(event, &client_events, &topic_events).await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event receiver lagged, missed {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    info!("Event channel closed");
                    break;
                }
            }
        }
    });

    // Task 3: MQTT event loop (receives messages, queues commands)
    let client_cmds = client.clone();
    let topic_cmds = publish_topic.clone();
    let sub_topic = subscribe_topic.clone();
    let mqtt_handle = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // (Re)subscribe after every broker connect/reconnect.
                    // rumqttc does not auto-resubscribe, so without this a
                    // broker restart silently drops our subscription and we
                    // stop receiving commands.
                    info!("MQTT: connected, subscribing to {sub_topic}");
                    if let Err(e) = client_cmds.subscribe(&sub_topic, QoS::AtLeastOnce).await {
                        error!("Failed to subscribe to {sub_topic}: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    if msg.topic == sub_topic {
                        let payload = String::from_utf8_lossy(&msg.payload);
                        match serde_json::from_str::<MqttCommand>(&payload) {
                            Ok(cmd) => {
                                info!("MQTT command received: {payload}");
                                dispatch_command(
                                    &payload,
                                    cmd,
                                    &cmd_tx,
                                    &client_cmds,
                                    &topic_cmds,
                                )
                                .await;
                            }
                            Err(e) => {
                                warn!("Failed to parse MQTT command: {e}");
                            }
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT event loop error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    // Task 4: command outcomes → CMD_ACK
    let client_acks = client.clone();
    let topic_acks = publish_topic.clone();
    let ack_handle = tokio::spawn(async move {
        while let Some(outcome) = ack_rx.recv().await {
            publish_cmd_ack(&client_acks, &topic_acks, outcome.success, outcome.src).await;
        }
    });

    // Wait for a signal
    let mut sigterm = signal(SignalKind::terminate())?;
    info!("MQTT bridge running. Send SIGINT/SIGTERM to stop.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Stop the poll loop, announce, and tear down
    let _ = shutdown_tx.send(true);
    publish_json(
        &client,
        &status_topic,
        &MqttSimpleEvent {
            now: now_epoch_ms(),
            op: "OFFLINE".to_string(),
        },
        true,
    )
    .await;
    let _ = panel_handle.await;
    event_handle.abort();
    mqtt_handle.abort();
    ack_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
