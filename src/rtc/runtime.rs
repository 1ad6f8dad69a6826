//! Process-wide WebRTC runtime
//!
//! The peer-connection API object is expensive to build (media engine,
//! interceptor registry) and must exist at most once per process. The
//! runtime is created lazily on first access and dropped when the last
//! session releases it.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

use crate::{EngineError, Result};

static INSTANCE: OnceLock<Mutex<Weak<RtcRuntime>>> = OnceLock::new();

/// Owner of the process-wide peer-connection factory
pub struct RtcRuntime {
    api: API,
}

impl RtcRuntime {
    /// Get (or lazily build) the shared runtime
    pub fn instance() -> Result<Arc<RtcRuntime>> {
        let slot = INSTANCE.get_or_init(|| Mutex::new(Weak::new()));
        let mut guard = slot.lock().unwrap();

        if let Some(existing) = guard.upgrade() {
            return Ok(existing);
        }

        let runtime = Arc::new(Self::build()?);
        *guard = Arc::downgrade(&runtime);
        Ok(runtime)
    }

    fn build() -> Result<Self> {
        debug!("initializing WebRTC runtime");

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| EngineError::WebRtc(format!("failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| EngineError::WebRtc(format!("failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }

    /// Construct a peer connection from the shared factory
    pub async fn create_peer_connection(
        &self,
        config: RTCConfiguration,
    ) -> Result<Arc<RTCPeerConnection>> {
        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| EngineError::WebRtc(format!("failed to create peer connection: {}", e)))?;
        Ok(Arc::new(pc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_is_shared() {
        let a = RtcRuntime::instance().unwrap();
        let b = RtcRuntime::instance().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
