use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::fingerprint::MatchMode;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen address for player connections
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Concurrent frame-processing jobs across all connections
    #[serde(default = "default_detect_slots")]
    pub detect_slots: usize,
}

fn default_listen_addr() -> String { "0.0.0.0:7777".to_string() }
fn default_detect_slots() -> usize { 2 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            detect_slots: default_detect_slots(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    /// Path to the hand landmark ONNX model
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum hands extracted per frame (1 or 2)
    #[serde(default = "default_max_hands")]
    pub max_hands: usize,
    /// Detections below this confidence are discarded
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_model() -> String { "models/hand_landmark.onnx".to_string() }
fn default_max_hands() -> usize { 2 }
fn default_min_confidence() -> f32 { 0.7 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_hands: default_max_hands(),
            min_confidence: default_min_confidence(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Base URL of the similarity store REST API
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Collection holding the reference sign fingerprints
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_store_url() -> String { "http://localhost:6333".to_string() }
fn default_collection() -> String { "lsm_signs".to_string() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            collection: default_collection(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Cosine similarity a hit must strictly exceed to count as correct
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Single-hand (60D) or dual-hand (120D) matching
    #[serde(default)]
    pub mode: MatchMode,
}

fn default_threshold() -> f32 { 0.98 }

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            mode: MatchMode::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the config file, falling back to defaults if it is missing or invalid.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "could not read {}: {e}; using defaults",
                    path.as_ref().display()
                );
                Config::default()
            }
        }
    }
}
