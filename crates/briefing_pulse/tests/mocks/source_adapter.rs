use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use briefing_datastore::{CandidateItem, SearchQuery, Source, SourceType};
use briefing_pulse::sources::SourceAdapter;

#[derive(Clone)]
pub struct MockSourceAdapter {
    pub name: String,
    pub items: Vec<CandidateItem>,
    pub rate_limited: bool,
    pub calls: Arc<Mutex<u32>>,
    pub fail_with: Option<String>,
}

impl MockSourceAdapter {
    pub fn new(name: &str, items: Vec<CandidateItem>) -> Self {
        Self {
            name: name.to_string(),
            items,
            rate_limited: false,
            calls: Arc::new(Mutex::new(0)),
            fail_with: None,
        }
    }

    /// `count` distinct feed items titled `<name> story <n>`
    pub fn with_stories(name: &str, count: usize) -> Self {
        let items = (0..count)
            .map(|i| {
                CandidateItem::new(
                    SourceType::Feed,
                    format!("{name} story {i}"),
                    format!("Full text of {name} story {i}."),
                )
                .with_url(format!("https://{name}.example.com/{i}"))
            })
            .collect();
        Self::new(name, items)
    }

    pub fn failing(name: &str, msg: &str) -> Self {
        Self {
            fail_with: Some(msg.to_string()),
            ..Self::new(name, Vec::new())
        }
    }

    pub fn as_rate_limited(mut self) -> Self {
        self.rate_limited = true;
        self
    }
}

#[async_trait]
impl SourceAdapter for MockSourceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limited(&self) -> bool {
        self.rate_limited
    }

    async fn fetch(
        &self,
        _sources: &[Source],
        _queries: &[SearchQuery],
    ) -> anyhow::Result<Vec<CandidateItem>> {
        *self.calls.lock().unwrap() += 1;
        if let Some(ref msg) = self.fail_with {
            return Err(anyhow::anyhow!("{}", msg));
        }
        Ok(self.items.clone())
    }
}
