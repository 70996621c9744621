//! SFU Call - Client-Engine für Audio/Video-Calls über eine SFU
//!
//! Bausteine:
//! - Store Engine als unidirektionaler State Container
//! - Audio Session Controller für die Geräte-Audio-Session
//! - ICE Adapter pro Peer Connection (Trickle, Restart)
//! - SFU Signaling Adapter über WebSocket
//! - Call Session als Besitzer aller Komponenten eines Calls

pub mod audio;
pub mod config;
pub mod ice;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod store;

#[cfg(test)]
mod test_support;

pub use audio::{AudioSessionController, CallAudioIntent};
pub use config::{CallConfig, ConfigError};
pub use ice::IceAdapter;
pub use peer::{PeerConnection, PeerRole, WebRtcPeerConnection};
pub use session::{CallSession, SessionError, SessionEvent, SessionState};
pub use signaling::{SfuAdapter, SignalingError};
pub use store::{Store, StoreError};

// ============================================================================
// LOGGING
// ============================================================================

/// Installiert den globalen tracing Subscriber
///
/// `RUST_LOG` plus `filter`; webrtc-rs wird auf `warn` gedrosselt. Schlägt
/// fehl, wenn bereits ein Subscriber installiert ist.
pub fn init_logging(filter: &str) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(filter.parse()?)
        .add_directive("webrtc=warn".parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;

    tracing::info!("Logging initialized ({})", filter);
    Ok(())
}
