//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/parking.toml

use crate::domain::types::SlotId;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioBackend {
    Sysfs,
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Http,
}

/// Line assignment for one slot (BCM numbering)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SlotConfig {
    pub id: String,
    pub trigger: u32,
    pub echo: u32,
    pub indicator: u32,
    /// Distance reported by the simulated backend (ignored on real hardware)
    #[serde(default = "default_simulated_distance")]
    pub simulated_distance_cm: f64,
}

fn default_simulated_distance() -> f64 {
    100.0
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "parking".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensingConfig {
    #[serde(default = "default_threshold")]
    pub distance_threshold_cm: f64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_inter_slot_delay")]
    pub inter_slot_delay_ms: u64,
    #[serde(default = "default_echo_timeout")]
    pub echo_timeout_ms: u64,
    #[serde(default = "default_trigger_pulse")]
    pub trigger_pulse_us: u64,
    #[serde(default = "default_min_distance")]
    pub min_distance_cm: f64,
    #[serde(default = "default_max_distance")]
    pub max_distance_cm: f64,
    /// Wait after line setup before the first poll
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

fn default_threshold() -> f64 {
    30.0
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_inter_slot_delay() -> u64 {
    100
}

fn default_echo_timeout() -> u64 {
    100
}

fn default_trigger_pulse() -> u64 {
    10
}

fn default_min_distance() -> f64 {
    2.0
}

fn default_max_distance() -> f64 {
    400.0
}

fn default_settle() -> u64 {
    2000
}

impl Default for SensingConfig {
    fn default() -> Self {
        Self {
            distance_threshold_cm: default_threshold(),
            poll_interval_ms: default_poll_interval(),
            inter_slot_delay_ms: default_inter_slot_delay(),
            echo_timeout_ms: default_echo_timeout(),
            trigger_pulse_us: default_trigger_pulse(),
            min_distance_cm: default_min_distance(),
            max_distance_cm: default_max_distance(),
            settle_ms: default_settle(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpioConfig {
    #[serde(default = "default_gpio_backend")]
    pub backend: GpioBackend,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,
}

fn default_gpio_backend() -> GpioBackend {
    GpioBackend::Sysfs
}

fn default_sysfs_root() -> String {
    "/sys/class/gpio".to_string()
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self { backend: default_gpio_backend(), sysfs_root: default_sysfs_root() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_document")]
    pub document: String,
    /// JSON file with {"username": ..., "password": ...}
    #[serde(default)]
    pub credentials_file: Option<String>,
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
    /// Compare-and-swap attempts per reconciliation before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_store_url() -> String {
    "http://localhost:8700".to_string()
}

fn default_collection() -> String {
    "parkslot".to_string()
}

fn default_document() -> String {
    "slots".to_string()
}

fn default_store_timeout() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            url: default_store_url(),
            collection: default_collection(),
            document: default_document(),
            credentials_file: None,
            timeout_ms: default_store_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// Emit the availability line to the log
    #[serde(default = "default_display_log")]
    pub log: bool,
}

fn default_display_log() -> bool {
    true
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { log: default_display_log() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "parking/availability".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

fn default_metrics_interval() -> u64 {
    60
}

fn default_prometheus_port() -> u16 {
    9100
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub sensing: SensingConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
    pub slots: Vec<SlotConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    sensing: SensingConfig,
    gpio_backend: GpioBackend,
    sysfs_root: String,
    slots: Vec<SlotConfig>,
    store: StoreConfig,
    display_log: bool,
    mqtt: MqttConfig,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            sensing: SensingConfig::default(),
            gpio_backend: GpioBackend::Sysfs,
            sysfs_root: default_sysfs_root(),
            slots: Self::default_slots(),
            store: StoreConfig::default(),
            display_log: true,
            mqtt: MqttConfig::default(),
            metrics_interval_secs: default_metrics_interval(),
            prometheus_port: default_prometheus_port(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Three-slot wiring of the reference board
    fn default_slots() -> Vec<SlotConfig> {
        let slot = |id: &str, trigger, echo, indicator| SlotConfig {
            id: id.to_string(),
            trigger,
            echo,
            indicator,
            simulated_distance_cm: default_simulated_distance(),
        };
        vec![slot("slotid1", 4, 17, 21), slot("slotid2", 27, 22, 20), slot("slotid3", 10, 9, 24)]
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_file = path.display().to_string();
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;

        let config = Self {
            site_id: toml_config.site.id,
            sensing: toml_config.sensing,
            gpio_backend: toml_config.gpio.backend,
            sysfs_root: toml_config.gpio.sysfs_root,
            slots: toml_config.slots,
            store: toml_config.store,
            display_log: toml_config.display.log,
            mqtt: toml_config.mqtt,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: "inline".to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the sensor loop cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.slots.is_empty() {
            bail!("at least one [[slots]] entry is required");
        }

        let mut ids = HashSet::new();
        let mut lines = HashSet::new();
        for slot in &self.slots {
            if slot.id.is_empty() || slot.id == crate::domain::types::AVAILABLE_KEY {
                bail!("invalid slot id {:?}", slot.id);
            }
            if !ids.insert(slot.id.as_str()) {
                bail!("duplicate slot id {}", slot.id);
            }
            for line in [slot.trigger, slot.echo, slot.indicator] {
                if !lines.insert(line) {
                    bail!("line {} assigned more than once (slot {})", line, slot.id);
                }
            }
        }

        let s = &self.sensing;
        if !(s.min_distance_cm < s.distance_threshold_cm
            && s.distance_threshold_cm < s.max_distance_cm)
        {
            bail!(
                "distance_threshold_cm {} must lie between min {} and max {}",
                s.distance_threshold_cm,
                s.min_distance_cm,
                s.max_distance_cm
            );
        }
        if s.poll_interval_ms == 0 || s.echo_timeout_ms == 0 || s.trigger_pulse_us == 0 {
            bail!("poll_interval_ms, echo_timeout_ms and trigger_pulse_us must be positive");
        }
        if self.store.max_attempts == 0 {
            bail!("store.max_attempts must be positive");
        }
        Ok(())
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn slots(&self) -> &[SlotConfig] {
        &self.slots
    }

    pub fn slot_ids(&self) -> Vec<SlotId> {
        self.slots.iter().map(|s| SlotId::new(s.id.clone())).collect()
    }

    pub fn distance_threshold_cm(&self) -> f64 {
        self.sensing.distance_threshold_cm
    }

    pub fn min_distance_cm(&self) -> f64 {
        self.sensing.min_distance_cm
    }

    pub fn max_distance_cm(&self) -> f64 {
        self.sensing.max_distance_cm
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sensing.poll_interval_ms)
    }

    pub fn inter_slot_delay(&self) -> Duration {
        Duration::from_millis(self.sensing.inter_slot_delay_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.sensing.echo_timeout_ms)
    }

    pub fn trigger_pulse(&self) -> Duration {
        Duration::from_micros(self.sensing.trigger_pulse_us)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.sensing.settle_ms)
    }

    pub fn gpio_backend(&self) -> GpioBackend {
        self.gpio_backend
    }

    pub fn sysfs_root(&self) -> &str {
        &self.sysfs_root
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.store.backend
    }

    pub fn store_url(&self) -> &str {
        &self.store.url
    }

    pub fn store_collection(&self) -> &str {
        &self.store.collection
    }

    pub fn store_document(&self) -> &str {
        &self.store.document
    }

    pub fn store_credentials_file(&self) -> Option<&str> {
        self.store.credentials_file.as_deref()
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    pub fn store_max_attempts(&self) -> u32 {
        self.store.max_attempts
    }

    pub fn display_log(&self) -> bool {
        self.display_log
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt.enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt.host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt.port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt.topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt.username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt.password.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to switch to the simulated line backend
    pub fn with_gpio_backend(mut self, backend: GpioBackend) -> Self {
        self.gpio_backend = backend;
        self
    }

    /// Builder method for tests to tighten loop timing
    pub fn with_timing(mut self, poll_interval_ms: u64, inter_slot_delay_ms: u64) -> Self {
        self.sensing.poll_interval_ms = poll_interval_ms;
        self.sensing.inter_slot_delay_ms = inter_slot_delay_ms;
        self.sensing.settle_ms = 0;
        self
    }

    /// Builder method for tests to set per-slot simulated distances
    pub fn with_simulated_distance(mut self, slot_id: &str, distance_cm: f64) -> Self {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == slot_id) {
            slot.simulated_distance_cm = distance_cm;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[slots]]
id = "bay1"
trigger = 5
echo = 6
indicator = 13
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "parking");
        assert_eq!(config.distance_threshold_cm(), 30.0);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.inter_slot_delay(), Duration::from_millis(100));
        assert_eq!(config.echo_timeout(), Duration::from_millis(100));
        assert_eq!(config.trigger_pulse(), Duration::from_micros(10));
        assert_eq!(config.slots().len(), 3);
        assert_eq!(config.slots()[1].trigger, 27);
        assert_eq!(config.store_collection(), "parkslot");
        assert_eq!(config.store_document(), "slots");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.slot_ids(), vec![SlotId::new("bay1")]);
        assert_eq!(config.gpio_backend(), GpioBackend::Sysfs);
        assert_eq!(config.store_backend(), StoreBackend::Memory);
        assert_eq!(config.store_max_attempts(), 5);
        assert!(!config.mqtt_enabled());
        assert_eq!(config.slots()[0].simulated_distance_cm, 100.0);
    }

    #[test]
    fn test_rejects_no_slots() {
        let err = Config::from_toml_str("slots = []").unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn test_rejects_duplicate_slot_ids() {
        let content = format!("{MINIMAL}\n[[slots]]\nid = \"bay1\"\ntrigger = 1\necho = 2\nindicator = 3\n");
        let err = Config::from_toml_str(&content).unwrap_err();
        assert!(err.to_string().contains("duplicate slot id"));
    }

    #[test]
    fn test_rejects_shared_line() {
        let content = format!("{MINIMAL}\n[[slots]]\nid = \"bay2\"\ntrigger = 6\necho = 7\nindicator = 8\n");
        let err = Config::from_toml_str(&content).unwrap_err();
        assert!(err.to_string().contains("line 6"));
    }

    #[test]
    fn test_rejects_reserved_slot_id() {
        let content = "[[slots]]\nid = \"available\"\ntrigger = 1\necho = 2\nindicator = 3\n";
        assert!(Config::from_toml_str(content).is_err());
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let content = format!("[sensing]\ndistance_threshold_cm = 500.0\n{MINIMAL}");
        let err = Config::from_toml_str(&content).unwrap_err();
        assert!(err.to_string().contains("distance_threshold_cm"));
    }

    #[test]
    fn test_with_timing_builder() {
        let config = Config::default().with_timing(5, 1);
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.inter_slot_delay(), Duration::from_millis(1));
        assert_eq!(config.settle_time(), Duration::ZERO);
    }
}
