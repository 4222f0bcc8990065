use std::sync::Arc;

use briefing_datastore::DataStore;
use chrono_tz::Tz;

use crate::{
    collector::Collector,
    filter::{RelevanceFilter, ScoringSettings, SelectionPolicy},
    llm::generator::LlmProvider,
    notify::{NoopNotifier, Notifier},
    pipeline::{BriefingPipeline, PipelineSettings},
    render::{AudioSynthesizer, BlobStore, Renderer, VoiceConfig},
    script::{NarrativeSynthesizer, SynthesisSettings},
    TextGenerator,
};

pub struct BriefingPipelineBuilder<D = (), G = (), A = (), B = ()> {
    store: D,
    generator: G,
    audio: A,
    blobs: B,
    collector: Collector,
    notifier: Arc<dyn Notifier>,
    selection_policy: SelectionPolicy,
    scoring_settings: ScoringSettings,
    synthesis_settings: SynthesisSettings,
    voice: VoiceConfig,
    settings: PipelineSettings,
}

impl Default for BriefingPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BriefingPipelineBuilder {
    pub fn new() -> Self {
        Self {
            store: (),
            generator: (),
            audio: (),
            blobs: (),
            collector: Collector::default(),
            notifier: Arc::new(NoopNotifier),
            selection_policy: SelectionPolicy::default(),
            scoring_settings: ScoringSettings::default(),
            synthesis_settings: SynthesisSettings::default(),
            voice: VoiceConfig::default(),
            settings: PipelineSettings::default(),
        }
    }
}

impl<D, G, A, B> BriefingPipelineBuilder<D, G, A, B> {
    pub fn store<D2: DataStore + Send + Sync + 'static>(
        self,
        store: D2,
    ) -> BriefingPipelineBuilder<D2, G, A, B> {
        BriefingPipelineBuilder {
            store,
            generator: self.generator,
            audio: self.audio,
            blobs: self.blobs,
            collector: self.collector,
            notifier: self.notifier,
            selection_policy: self.selection_policy,
            scoring_settings: self.scoring_settings,
            synthesis_settings: self.synthesis_settings,
            voice: self.voice,
            settings: self.settings,
        }
    }

    pub fn generator<G2: TextGenerator + Send + Sync + 'static>(
        self,
        generator: G2,
    ) -> BriefingPipelineBuilder<D, G2, A, B> {
        BriefingPipelineBuilder {
            store: self.store,
            generator,
            audio: self.audio,
            blobs: self.blobs,
            collector: self.collector,
            notifier: self.notifier,
            selection_policy: self.selection_policy,
            scoring_settings: self.scoring_settings,
            synthesis_settings: self.synthesis_settings,
            voice: self.voice,
            settings: self.settings,
        }
    }

    pub fn audio_synthesizer<A2: AudioSynthesizer + Send + Sync + 'static>(
        self,
        audio: A2,
    ) -> BriefingPipelineBuilder<D, G, A2, B> {
        BriefingPipelineBuilder {
            store: self.store,
            generator: self.generator,
            audio,
            blobs: self.blobs,
            collector: self.collector,
            notifier: self.notifier,
            selection_policy: self.selection_policy,
            scoring_settings: self.scoring_settings,
            synthesis_settings: self.synthesis_settings,
            voice: self.voice,
            settings: self.settings,
        }
    }

    pub fn blob_store<B2: BlobStore + Send + Sync + 'static>(
        self,
        blobs: B2,
    ) -> BriefingPipelineBuilder<D, G, A, B2> {
        BriefingPipelineBuilder {
            store: self.store,
            generator: self.generator,
            audio: self.audio,
            blobs,
            collector: self.collector,
            notifier: self.notifier,
            selection_policy: self.selection_policy,
            scoring_settings: self.scoring_settings,
            synthesis_settings: self.synthesis_settings,
            voice: self.voice,
            settings: self.settings,
        }
    }

    pub fn collector(mut self, collector: Collector) -> Self {
        self.collector = collector;
        self
    }

    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn shared_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn selection_policy(mut self, policy: SelectionPolicy) -> Self {
        self.selection_policy = policy;
        self
    }

    pub fn scoring_settings(mut self, settings: ScoringSettings) -> Self {
        self.scoring_settings = settings;
        self
    }

    pub fn synthesis_settings(mut self, settings: SynthesisSettings) -> Self {
        self.synthesis_settings = settings;
        self
    }

    pub fn voice(mut self, voice: VoiceConfig) -> Self {
        self.voice = voice;
        self
    }

    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.settings.timezone = timezone;
        self
    }

    pub fn topic_episodes(mut self, count: usize) -> Self {
        self.settings.topic_episodes = count;
        self
    }

    pub fn provider(mut self, provider: LlmProvider) -> Self {
        self.settings.provider = provider;
        self
    }
}

impl<D, G, A, B> BriefingPipelineBuilder<D, G, A, B>
where
    D: DataStore + Send + Sync + 'static,
    G: TextGenerator + Send + Sync + 'static,
    A: AudioSynthesizer + Send + Sync + 'static,
    B: BlobStore + Send + Sync + 'static,
{
    pub fn build(self) -> BriefingPipeline<D, G, A, B> {
        BriefingPipeline {
            store: self.store,
            generator: self.generator,
            audio: self.audio,
            blobs: self.blobs,
            collector: self.collector,
            notifier: self.notifier,
            filter: RelevanceFilter::new(self.selection_policy)
                .with_settings(self.scoring_settings),
            synthesizer: NarrativeSynthesizer::new(self.synthesis_settings),
            renderer: Renderer::new(self.voice),
            settings: self.settings,
        }
    }
}
