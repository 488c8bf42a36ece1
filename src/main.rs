// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rppal::gpio::{Gpio, IoPin, Level, Mode, OutputPin, Trigger};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{Duration, interval};
use tracing::{debug, error, info, warn};

use crow_bus_bridge::{
    BridgeConfig, BusEngine, BusEvent, DataPin, EdgeSampler, EngineHandle, FileStore, HostDelay,
    Key, PanelVariant, Transmitter, ZoneEventKind,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "crow2mqtt")]
#[command(about = "Bridge between a Crow alarm keypad bus and MQTT")]
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
    /// Panel generation on the bus ("runner816" or "powerwave16").
    #[serde(default = "default_variant")]
    variant: String,
    /// BCM pin wired to the keypad bus clock line (via a level shifter).
    clock_pin: u8,
    /// BCM pin wired to the keypad bus data line.
    data_pin: u8,
    /// Single-byte file the alarm status is persisted to.
    #[serde(default = "default_status_file")]
    status_file: String,
    /// Relay output simulating the total-arm keyswitch (pinout option 2).
    #[serde(default)]
    keyswitch_total_pin: Option<u8>,
    /// Relay output simulating the partial-arm keyswitch.
    #[serde(default)]
    keyswitch_partial_pin: Option<u8>,
    #[serde(default = "default_keyswitch_pulse")]
    keyswitch_pulse_ms: u64,
    #[serde(default = "default_quiet_timeout")]
    quiet_timeout_ms: u64,
    #[serde(default = "default_clock_timeout")]
    clock_timeout_ms: u64,
    #[serde(default = "default_inter_key_gap")]
    inter_key_gap_ms: u64,
    /// Start with protocol tracing enabled.
    #[serde(default)]
    trace: bool,
}

fn default_variant() -> String {
    "runner816".to_string()
}
fn default_status_file() -> String {
    "/var/lib/crow2mqtt/status".to_string()
}
fn default_keyswitch_pulse() -> u64 {
    1000
}
fn default_quiet_timeout() -> u64 {
    10000
}
fn default_clock_timeout() -> u64 {
    500
}
fn default_inter_key_gap() -> u64 {
    50
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_zone_topic")]
    zone_topic: String,
    #[serde(default = "default_status_topic")]
    status_topic: String,
    #[serde(default = "default_command_topic")]
    command_topic: String,
    #[serde(default = "default_availability_topic")]
    availability_topic: String,
    #[serde(default = "default_debug_topic")]
    debug_topic: String,
    #[serde(default = "default_log_topic")]
    log_topic: String,
    #[serde(default = "default_republish_interval")]
    republish_interval_secs: u64,
}

fn default_client_id() -> String {
    "crow-bridge".to_string()
}
fn default_zone_topic() -> String {
    "alarm/zones".to_string()
}
fn default_status_topic() -> String {
    "alarm/status".to_string()
}
fn default_command_topic() -> String {
    "alarm/control".to_string()
}
fn default_availability_topic() -> String {
    "alarm/lwt".to_string()
}
fn default_debug_topic() -> String {
    "alarm/debug".to_string()
}
fn default_log_topic() -> String {
    "alarm/log".to_string()
}
fn default_republish_interval() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Zone events: {now, op, zone}
#[derive(Serialize)]
struct MqttZoneEvent {
    now: u64,
    op: String,
    zone: u8,
}

// Protocol trace: {now, op, raw, destuffed}
#[derive(Serialize)]
struct MqttFrameTrace {
    now: u64,
    op: String,
    raw: String,
    destuffed: String,
}

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

// ---------------------------------------------------------------------------
// GPIO wiring
// ---------------------------------------------------------------------------

/// Clock input shared between the interrupt registration and the
/// transmitter's level polling.
struct SharedClock(Arc<Mutex<rppal::gpio::InputPin>>);

impl embedded_hal::digital::ErrorType for SharedClock {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::InputPin for SharedClock {
    fn is_high(&mut self) -> std::result::Result<bool, Self::Error> {
        Ok(self.0.lock().unwrap().is_high())
    }

    fn is_low(&mut self) -> std::result::Result<bool, Self::Error> {
        Ok(self.0.lock().unwrap().is_low())
    }
}

/// Bidirectional data line, shared between the clock interrupt (reads) and
/// the transmitter (drives).
struct SharedData(Arc<Mutex<IoPin>>);

impl DataPin for SharedData {
    fn set_output(&mut self) {
        self.0.lock().unwrap().set_mode(Mode::Output);
    }

    fn write(&mut self, high: bool) {
        let mut pin = self.0.lock().unwrap();
        if high {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }

    fn set_input(&mut self) {
        self.0.lock().unwrap().set_mode(Mode::Input);
    }
}

struct BusLines {
    clock: SharedClock,
    data: SharedData,
    keyswitch_total: Option<Arc<Mutex<OutputPin>>>,
    keyswitch_partial: Option<Arc<Mutex<OutputPin>>>,
}

fn relay_pin(gpio: &Gpio, pin: Option<u8>) -> Result<Option<Arc<Mutex<OutputPin>>>> {
    match pin {
        Some(p) => {
            let pin = gpio
                .get(p)
                .with_context(|| format!("Failed to claim keyswitch pin {p}"))?
                .into_output_low();
            Ok(Some(Arc::new(Mutex::new(pin))))
        }
        None => Ok(None),
    }
}

/// Claim the bus pins and hook the sampler to the falling clock edge.
fn setup_gpio(cfg: &PanelToml, mut sampler: EdgeSampler) -> Result<BusLines> {
    let gpio = Gpio::new().context("Failed to open GPIO")?;

    let mut clk = gpio
        .get(cfg.clock_pin)
        .with_context(|| format!("Failed to claim clock pin {}", cfg.clock_pin))?
        .into_input();
    let dat = Arc::new(Mutex::new(
        gpio.get(cfg.data_pin)
            .with_context(|| format!("Failed to claim data pin {}", cfg.data_pin))?
            .into_io(Mode::Input),
    ));

    // The panel clocks data out on the falling edge. try_lock: when the
    // transmitter holds the line there is nothing meaningful to sample.
    let dat_irq = Arc::clone(&dat);
    clk.set_async_interrupt(Trigger::FallingEdge, None, move |_| {
        if let Ok(pin) = dat_irq.try_lock() {
            sampler.on_clock_edge(pin.read() == Level::High);
        }
    })
    .context("Failed to register clock interrupt")?;

    Ok(BusLines {
        clock: SharedClock(Arc::new(Mutex::new(clk))),
        data: SharedData(dat),
        keyswitch_total: relay_pin(&gpio, cfg.keyswitch_total_pin)?,
        keyswitch_partial: relay_pin(&gpio, cfg.keyswitch_partial_pin)?,
    })
}

/// Drive a keyswitch relay high for the configured pulse, off the async
/// runtime.
async fn pulse_relay(relay: &Arc<Mutex<OutputPin>>, pulse_ms: u64) {
    let relay = Arc::clone(relay);
    let _ = tokio::task::spawn_blocking(move || {
        let mut pin = relay.lock().unwrap();
        pin.set_high();
        std::thread::sleep(std::time::Duration::from_millis(pulse_ms));
        pin.set_low();
    })
    .await;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_retained(client: &AsyncClient, topic: &str, payload: &str) {
    if let Err(e) = client.publish(topic, QoS::AtLeastOnce, true, payload).await {
        error!("Failed to publish to {topic}: {e}");
    }
}

async fn publish_log(client: &AsyncClient, topic: &str, message: &str) {
    if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, message).await {
        error!("Failed to publish to {topic}: {e}");
    }
}

// ---------------------------------------------------------------------------
// Command handling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    ArmTotal,
    ArmPartial,
    Panic,
    Disarm(String),
    Refresh,
    Enter,
    Digit(u8),
    TraceOn,
    TraceOff,
    KeyswitchTotal,
    KeyswitchPartial,
}

/// Parse a control-topic payload. Payloads are plain strings, the way the
/// keypad firmware's control topic worked.
fn parse_command(payload: &str) -> Option<Command> {
    let payload = payload.trim();
    if let Some(code) = payload
        .strip_prefix("disarm-")
        .or_else(|| payload.strip_prefix("disarm "))
    {
        return Some(Command::Disarm(code.to_string()));
    }
    if let Some(digit) = payload.strip_prefix("key ") {
        return digit
            .parse::<u8>()
            .ok()
            .filter(|d| *d <= 9)
            .map(Command::Digit);
    }
    match payload {
        "arm_total" => Some(Command::ArmTotal),
        "arm_partial" => Some(Command::ArmPartial),
        "panic" => Some(Command::Panic),
        "refresh" => Some(Command::Refresh),
        "enter" => Some(Command::Enter),
        "trace_on" => Some(Command::TraceOn),
        "trace_off" => Some(Command::TraceOff),
        "keyswitch_total" => Some(Command::KeyswitchTotal),
        "keyswitch_partial" => Some(Command::KeyswitchPartial),
        _ => None,
    }
}

struct Keyswitches {
    total: Option<Arc<Mutex<OutputPin>>>,
    partial: Option<Arc<Mutex<OutputPin>>>,
    pulse_ms: u64,
}

/// Run a bus command and log its outcome to the log topic.
async fn exec_bus_cmd(
    op: &str,
    fut: impl std::future::Future<Output = crow_bus_bridge::Result<()>>,
    client: &AsyncClient,
    log_topic: &str,
) {
    match fut.await {
        Ok(()) => {
            info!("{op}: sent");
            publish_log(client, log_topic, &format!("{op}: sent")).await;
        }
        Err(e) => {
            warn!("{op} failed: {e}");
            publish_log(client, log_topic, &format!("{op} failed: {e}")).await;
        }
    }
}

async fn handle_command(
    cmd: Command,
    handle: EngineHandle,
    client: AsyncClient,
    mqtt: Arc<MqttToml>,
    keyswitches: Arc<Keyswitches>,
) {
    let log = &mqtt.log_topic;
    match cmd {
        Command::ArmTotal => exec_bus_cmd("arm_total", handle.arm_total(), &client, log).await,
        Command::ArmPartial => {
            exec_bus_cmd("arm_partial", handle.arm_partial(), &client, log).await
        }
        Command::Panic => exec_bus_cmd("panic", handle.trigger_panic(), &client, log).await,
        // The outcome log never echoes the code itself.
        Command::Disarm(code) => exec_bus_cmd("disarm", handle.disarm(&code), &client, log).await,
        Command::Refresh => exec_bus_cmd("refresh", handle.refresh_status(), &client, log).await,
        Command::Enter => exec_bus_cmd("enter", handle.send_key(Key::Enter), &client, log).await,
        Command::Digit(d) => {
            exec_bus_cmd(&format!("key {d}"), handle.send_key(Key::Digit(d)), &client, log).await
        }
        Command::TraceOn => {
            handle.set_trace(true);
            publish_log(&client, log, "Protocol trace on").await;
        }
        Command::TraceOff => {
            handle.set_trace(false);
            publish_log(&client, log, "Protocol trace off").await;
        }
        Command::KeyswitchTotal => match &keyswitches.total {
            Some(relay) => {
                publish_log(&client, log, "Pulsing total keyswitch").await;
                pulse_relay(relay, keyswitches.pulse_ms).await;
            }
            None => warn!("keyswitch_total: no relay pin configured"),
        },
        Command::KeyswitchPartial => match &keyswitches.partial {
            Some(relay) => {
                publish_log(&client, log, "Pulsing partial keyswitch").await;
                pulse_relay(relay, keyswitches.pulse_ms).await;
            }
            None => warn!("keyswitch_partial: no relay pin configured"),
        },
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or
    // RUST_LOG=crow_bus_bridge=trace). Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    let config_text =
        std::fs::read_to_string(&cli.config).context("Failed to read config file")?;
    let config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;

    let variant = PanelVariant::from_name(&config.panel.variant)
        .with_context(|| format!("Unknown panel variant: {}", config.panel.variant))?;
    let bridge_config = BridgeConfig::builder()
        .variant(variant)
        .quiet_timeout_ms(config.panel.quiet_timeout_ms)
        .clock_timeout_ms(config.panel.clock_timeout_ms)
        .inter_key_gap_ms(config.panel.inter_key_gap_ms)
        .trace(config.panel.trace)
        .build();

    // Engine, interrupt-side sampler, and the transmit queue
    let store = FileStore::new(&config.panel.status_file);
    let (engine, sampler, commands) = BusEngine::new(bridge_config.clone(), Box::new(store));
    let handle = engine.handle();
    let mut events = engine.subscribe();
    let line = engine.line();

    info!(
        "Attaching to keypad bus ({}, clock GPIO{}, data GPIO{})",
        variant.spec().name,
        config.panel.clock_pin,
        config.panel.data_pin
    );
    let lines = setup_gpio(&config.panel, sampler)?;
    let keyswitches = Arc::new(Keyswitches {
        total: lines.keyswitch_total,
        partial: lines.keyswitch_partial,
        pulse_ms: config.panel.keyswitch_pulse_ms,
    });

    // The transmitter bit-bangs with bounded micro-sleeps, so it gets a
    // plain thread instead of a runtime worker.
    let transmitter = Transmitter::new(lines.clock, lines.data, HostDelay, line, &bridge_config);
    std::thread::spawn(move || transmitter.run_worker(commands));

    tokio::spawn(engine.run());

    // Set up MQTT
    let mqtt_cfg = Arc::new(config.mqtt);
    let (mqtt_host, mqtt_port) = parse_mqtt_url(&mqtt_cfg.url)?;
    let mut mqtt_opts = MqttOptions::new(&mqtt_cfg.client_id, mqtt_host, mqtt_port);
    mqtt_opts.set_keep_alive(Duration::from_secs(30));
    mqtt_opts.set_last_will(LastWill::new(
        &mqtt_cfg.availability_topic,
        "Offline",
        QoS::AtLeastOnce,
        true,
    ));
    let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 64);

    // Task 1: decoded bus events -> MQTT
    let pump_client = client.clone();
    let pump_cfg = Arc::clone(&mqtt_cfg);
    let pump_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BusEvent::Zone(zone)) => {
                    let op = match zone.kind {
                        ZoneEventKind::Activated => "zone_active",
                        ZoneEventKind::Triggered => "zone_triggered",
                    };
                    let msg = MqttZoneEvent {
                        now: now_epoch_ms(),
                        op: op.to_string(),
                        zone: zone.zone,
                    };
                    publish_json(&pump_client, &pump_cfg.zone_topic, &msg).await;
                }
                Ok(BusEvent::Status { status, .. }) => {
                    // Retained and republished on every status frame, so the
                    // broker always carries a fresh confirmation.
                    publish_retained(&pump_client, &pump_cfg.status_topic, status.as_str())
                        .await;
                }
                Ok(BusEvent::FrameTrace { raw, destuffed }) => {
                    let msg = MqttFrameTrace {
                        now: now_epoch_ms(),
                        op: "frame".to_string(),
                        raw,
                        destuffed,
                    };
                    publish_json(&pump_client, &pump_cfg.debug_topic, &msg).await;
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

    // Task 2: MQTT event loop (receives messages, handles commands)
    let cmd_client = client.clone();
    let cmd_cfg = Arc::clone(&mqtt_cfg);
    let cmd_engine = handle.clone();
    let cmd_keyswitches = Arc::clone(&keyswitches);
    let mqtt_handle = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // (Re)subscribe after every broker connect/reconnect.
                    // rumqttc does not auto-resubscribe, so without this a
                    // broker restart silently drops our subscription and we
                    // stop receiving commands.
                    info!("MQTT: connected, subscribing to {}", cmd_cfg.command_topic);
                    if let Err(e) = cmd_client
                        .subscribe(&cmd_cfg.command_topic, QoS::AtLeastOnce)
                        .await
                    {
                        error!("Failed to subscribe to {}: {e}", cmd_cfg.command_topic);
                    }
                    publish_retained(&cmd_client, &cmd_cfg.availability_topic, "Online").await;
                    publish_retained(
                        &cmd_client,
                        &cmd_cfg.status_topic,
                        cmd_engine.status().as_str(),
                    )
                    .await;
                }
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    if msg.topic != cmd_cfg.command_topic {
                        continue;
                    }
                    let payload = String::from_utf8_lossy(&msg.payload);
                    match parse_command(&payload) {
                        Some(cmd) => {
                            debug!("MQTT command: {cmd:?}");
                            // Transmission can take seconds waiting for a
                            // quiet bus; never block the MQTT loop on it.
                            tokio::spawn(handle_command(
                                cmd,
                                cmd_engine.clone(),
                                cmd_client.clone(),
                                Arc::clone(&cmd_cfg),
                                Arc::clone(&cmd_keyswitches),
                            ));
                        }
                        None => warn!("Unknown command payload: {payload}"),
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

    // Task 3: periodic status republish, alongside the panel's own reports
    let tick_client = client.clone();
    let tick_cfg = Arc::clone(&mqtt_cfg);
    let tick_engine = handle.clone();
    let tick_handle = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(tick_cfg.republish_interval_secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            publish_retained(
                &tick_client,
                &tick_cfg.status_topic,
                tick_engine.status().as_str(),
            )
            .await;
        }
    });

    // Ask the panel for a fresh status so the retained topic does not rely
    // on the restored value for long.
    let refresh_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = refresh_handle.refresh_status().await {
            warn!("Startup status refresh failed: {e}");
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

    publish_retained(&client, &mqtt_cfg.availability_topic, "Offline").await;
    pump_handle.abort();
    mqtt_handle.abort();
    tick_handle.abort();

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

    let port: u16 = port_str
        .parse()
        .context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
