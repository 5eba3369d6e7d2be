//! Core Configuration
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default window for an unanswered offer/answer exchange.
const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(15);

/// ICE server entry handed to the connection backend.
#[derive(Debug, Clone)]
pub struct IceServerConfig {
    /// Server URLs (`stun:` or `turn:` schemes).
    pub urls: Vec<String>,
    /// TURN username, if the server requires one.
    pub username: Option<String>,
    /// TURN credential, if the server requires one.
    pub credential: Option<String>,
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            username: None,
            credential: None,
        }
    }
}

/// Tuning for active-speaker detection.
#[derive(Debug, Clone)]
pub struct SpeakerConfig {
    /// RMS level below which a track counts as silent (linear, 0.0-1.0).
    pub silence_threshold: f32,
    /// How long a participant must stay above the threshold to take the floor.
    pub sustain: Duration,
    /// Factor by which a challenger's level must exceed the floor holder's.
    pub hysteresis: f32,
    /// Silence longer than this releases the floor.
    pub release: Duration,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.05,
            sustain: Duration::from_millis(300),
            hysteresis: 1.5,
            release: Duration::from_millis(600),
        }
    }
}

/// Core configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RtcConfig {
    /// WebRTC STUN server.
    pub stun_server: String,

    /// WebRTC TURN server (optional).
    pub turn_server: Option<String>,

    /// WebRTC TURN username (optional).
    pub turn_username: Option<String>,

    /// WebRTC TURN credential (optional).
    pub turn_credential: Option<String>,

    /// Window for an unanswered offer/answer exchange before the session
    /// transitions to failed.
    pub negotiation_timeout: Duration,

    /// Active-speaker detection tuning.
    pub speaker: SpeakerConfig,
}

impl RtcConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let negotiation_timeout = match env::var("NEGOTIATION_TIMEOUT_MS") {
            Ok(v) => {
                let ms: u64 = v
                    .parse()
                    .with_context(|| format!("invalid NEGOTIATION_TIMEOUT_MS: {v}"))?;
                Duration::from_millis(ms)
            }
            Err(_) => DEFAULT_NEGOTIATION_TIMEOUT,
        };

        let mut speaker = SpeakerConfig::default();
        if let Ok(v) = env::var("SPEAKER_SILENCE_THRESHOLD") {
            speaker.silence_threshold = v
                .parse()
                .with_context(|| format!("invalid SPEAKER_SILENCE_THRESHOLD: {v}"))?;
        }
        if let Ok(v) = env::var("SPEAKER_SUSTAIN_MS") {
            let ms: u64 = v
                .parse()
                .with_context(|| format!("invalid SPEAKER_SUSTAIN_MS: {v}"))?;
            speaker.sustain = Duration::from_millis(ms);
        }

        Ok(Self {
            stun_server: env::var("STUN_SERVER")
                .unwrap_or_else(|_| "stun:stun.l.google.com:19302".into()),
            turn_server: env::var("TURN_SERVER").ok(),
            turn_username: env::var("TURN_USERNAME").ok(),
            turn_credential: env::var("TURN_CREDENTIAL").ok(),
            negotiation_timeout,
            speaker,
        })
    }

    /// ICE servers derived from this configuration.
    #[must_use]
    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        let mut servers = vec![IceServerConfig {
            urls: vec![self.stun_server.clone()],
            username: None,
            credential: None,
        }];

        if let Some(turn) = &self.turn_server {
            servers.push(IceServerConfig {
                urls: vec![turn.clone()],
                username: self.turn_username.clone(),
                credential: self.turn_credential.clone(),
            });
        }

        servers
    }

    /// Configuration for tests: defaults plus a short negotiation window.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            negotiation_timeout: Duration::from_millis(500),
            ..Self::default()
        }
    }
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            stun_server: "stun:stun.l.google.com:19302".to_string(),
            turn_server: None,
            turn_username: None,
            turn_credential: None,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            speaker: SpeakerConfig::default(),
        }
    }
}
