use std::sync::{Arc, Mutex};

use briefing_pulse::render::BlobStore;

#[derive(Clone, Default)]
pub struct MockBlobStore {
    /// (path, size, content type)
    pub puts: Arc<Mutex<Vec<(String, usize, String)>>>,
    pub fail_with: Option<String>,
}

impl MockBlobStore {
    pub fn failing(msg: &str) -> Self {
        Self {
            fail_with: Some(msg.to_string()),
            ..Default::default()
        }
    }
}

impl BlobStore for MockBlobStore {
    type Error = anyhow::Error;

    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, Self::Error> {
        self.puts
            .lock()
            .unwrap()
            .push((path.to_string(), bytes.len(), content_type.to_string()));
        if let Some(ref msg) = self.fail_with {
            return Err(anyhow::anyhow!("{}", msg));
        }
        Ok(format!("https://cdn.test/{path}"))
    }
}
