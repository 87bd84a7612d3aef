//! Audio synthesis seam for voice replies.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize the reply text. `None` means no audio is produced.
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>>;
}

/// Default synthesizer: audio disabled.
#[derive(Debug, Clone, Default)]
pub struct NoopSynthesizer;

#[async_trait]
impl SpeechSynthesizer for NoopSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}
