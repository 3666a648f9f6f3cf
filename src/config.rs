use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::audio::CaptureConfig;
use crate::barge_in::DEFAULT_THRESHOLD;
use crate::connection::{endpoint, ReconnectPolicy, VOICE_PATH};
use crate::session::{SessionConfig, SessionMode};

/// Application configuration
///
/// Every section has defaults, so an absent file yields a working setup.
/// Values are layered: defaults, then the optional file, then `VOICE__*`
/// environment variables (e.g. `VOICE__SERVER__URL`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub barge_in: BargeInConfig,
    pub reconnect: ReconnectConfig,
    pub session: SessionSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// Where the voice server lives
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server origin; `http(s)` is mapped to `ws(s)`
    pub url: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub channels: u16,
    pub frame_samples: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    pub threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub mode: SessionMode,
    pub start_muted: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voice-session".to_string(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3040,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            path: VOICE_PATH.to_string(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        Self {
            capture_sample_rate: capture.sample_rate,
            playback_sample_rate: 24000,
            channels: capture.channels,
            frame_samples: capture.frame_samples,
        }
    }
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            max_attempts: policy.max_attempts,
        }
    }
}

impl Config {
    /// Load `path` (extension optional, file optional) plus environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("VOICE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        let cfg: Self = settings
            .try_deserialize()
            .with_context(|| format!("Invalid config {}", path))?;
        cfg.validate()?;

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.audio.capture_sample_rate > 0, "audio.capture_sample_rate must be positive");
        ensure!(self.audio.playback_sample_rate > 0, "audio.playback_sample_rate must be positive");
        ensure!(self.audio.channels > 0, "audio.channels must be positive");
        ensure!(self.audio.frame_samples > 0, "audio.frame_samples must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.barge_in.threshold),
            "barge_in.threshold must be within [0, 1]"
        );
        ensure!(self.reconnect.multiplier >= 1.0, "reconnect.multiplier must be at least 1");
        ensure!(
            self.reconnect.base_delay_ms <= self.reconnect.max_delay_ms,
            "reconnect.base_delay_ms must not exceed reconnect.max_delay_ms"
        );
        Ok(())
    }

    /// WebSocket address of the voice endpoint
    pub fn voice_url(&self) -> Result<String> {
        endpoint(&self.server.url, &self.server.path)
            .with_context(|| format!("Invalid server.url {}", self.server.url))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            multiplier: self.reconnect.multiplier,
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    /// Settings for a new session, with a fresh session id
    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            server_url: self.voice_url()?,
            capture: CaptureConfig {
                sample_rate: self.audio.capture_sample_rate,
                channels: self.audio.channels,
                frame_samples: self.audio.frame_samples,
            },
            playback_sample_rate: self.audio.playback_sample_rate,
            barge_in_threshold: self.barge_in.threshold,
            reconnect: self.reconnect_policy(),
            mode: self.session.mode,
            start_muted: self.session.start_muted,
            ..SessionConfig::default()
        })
    }
}
