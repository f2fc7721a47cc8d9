//! Local capture contract

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::MediaTrack;
use crate::error::CaptureError;

/// Which local kinds to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Camera/microphone acquisition, provided by the host application
#[async_trait]
pub trait LocalMedia: Send + Sync {
    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, CaptureError>;
}
