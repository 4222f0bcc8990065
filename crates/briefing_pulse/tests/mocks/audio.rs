use std::sync::{Arc, Mutex};

use briefing_pulse::render::{AudioSynthesizer, VoiceConfig};

#[derive(Clone, Default)]
pub struct MockAudioSynthesizer {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_with: Option<String>,
}

impl MockAudioSynthesizer {
    pub fn failing(msg: &str) -> Self {
        Self {
            fail_with: Some(msg.to_string()),
            ..Default::default()
        }
    }
}

impl AudioSynthesizer for MockAudioSynthesizer {
    type Error = anyhow::Error;

    async fn synthesize(&self, text: &str, _voice: &VoiceConfig) -> Result<Vec<u8>, Self::Error> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some(ref msg) = self.fail_with {
            return Err(anyhow::anyhow!("{}", msg));
        }
        Ok(b"ID3mock-audio".to_vec())
    }
}
