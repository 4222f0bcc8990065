use std::{net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc};

use anyhow::Context;
use apalis::{
    layers::{retry::RetryPolicy, sentry::SentryLayer},
    prelude::*,
};
use apalis_cron::{CronStream, Tick};
use async_trait::async_trait;
use briefing_datastore::{Episode, PgDataStore};
use briefing_pulse::{
    collector::Collector,
    filter::{ScoringSettings, SelectionPolicy},
    notify::{NoopNotifier, Notifier, SlackWebhook},
    openai::OpenAIClient,
    progress::ProgressSink,
    render::VoiceConfig,
    server::{router, AppState, PipelineLauncher},
    sources::feed::FeedAdapter,
    storage::{ConfiguredBlobStore, FsBlobStore, HttpBlobStore},
    tracing::init_tracing_subscriber,
    report_setup_failure, BriefingPipeline, BriefingPipelineBuilder, LlmProvider,
};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use cron::Schedule;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "briefing-pulse", about = "Daily audio news briefing pipeline")]
struct Cli {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// OpenAI API key (text generation and speech)
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_key: String,

    /// OpenRouter API key, required when the provider is `openrouter`
    #[arg(long, env = "OPENROUTER_API_KEY")]
    openrouter_key: Option<String>,

    /// Default text generation provider
    #[arg(long, env = "LLM_PROVIDER", value_enum, default_value_t = LlmProvider::OpenAi)]
    provider: LlmProvider,

    /// Overrides the provider's default model
    #[arg(long, env = "LLM_MODEL")]
    model: Option<String>,

    /// Speech voice
    #[arg(long, env = "TTS_VOICE", default_value = "alloy")]
    voice: String,

    /// Slack incoming webhook for run notifications
    #[arg(long, env = "SLACK_WEBHOOK_URL")]
    slack_webhook_url: Option<String>,

    /// HTTP object storage endpoint; audio is written to `audio_dir` when unset
    #[arg(long, env = "STORAGE_URL")]
    storage_url: Option<String>,

    #[arg(long, env = "STORAGE_TOKEN")]
    storage_token: Option<String>,

    /// Public read endpoint of the object storage; defaults to `storage_url`
    #[arg(long, env = "STORAGE_PUBLIC_URL")]
    storage_public_url: Option<String>,

    #[arg(long, env = "STORAGE_BUCKET", default_value = HttpBlobStore::DEFAULT_BUCKET)]
    storage_bucket: String,

    /// Local audio directory
    #[arg(long, env = "AUDIO_DIR", default_value = "/var/tmp/briefing-pulse/audio")]
    audio_dir: PathBuf,

    /// Public URL the audio directory is served from
    #[arg(long, env = "PUBLIC_AUDIO_BASE_URL", default_value = "http://localhost:8080/audio")]
    public_audio_base_url: String,

    /// IANA zone the episode date is taken in
    #[arg(long, env = "BRIEFING_TIMEZONE", default_value = "UTC")]
    timezone: Tz,

    /// Days of ingested items a new item is deduplicated against
    #[arg(long, env = "RECENCY_WINDOW_DAYS", default_value = "7")]
    recency_window_days: i64,

    #[arg(long, env = "MIN_SCORE", default_value = "6")]
    min_score: f64,

    #[arg(long, env = "MIN_ITEMS", default_value = "8")]
    min_items: usize,

    #[arg(long, env = "MAX_ITEMS", default_value = "12")]
    max_items: usize,

    /// Most items sent to the scoring request; the newest are kept
    #[arg(long, env = "SCORING_MAX_CANDIDATES", default_value = "120")]
    scoring_max_candidates: usize,

    /// Completion token ceiling of the scoring request
    #[arg(long, env = "SCORING_MAX_OUTPUT_TOKENS", default_value = "8000")]
    scoring_max_output_tokens: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline once and exit
    Run {
        /// Provider for this run only
        #[arg(long, value_enum)]
        provider: Option<LlmProvider>,
    },
    /// Start the cron scheduler
    Cron {
        /// Cron schedule expression
        #[arg(long, env = "CRON_SCHEDULE", default_value = "0 0 5 * * *")]
        schedule: String,

        /// Scheduler-level retries of a failed run
        #[arg(long, default_value = "0")]
        retries: usize,
    },
    /// Serve the HTTP trigger API
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
    },
}

#[derive(Clone)]
struct Config {
    db_url: String,
    openai_key: String,
    openrouter_key: Option<String>,
    provider: LlmProvider,
    model: Option<String>,
    voice: String,
    slack_webhook_url: Option<String>,
    storage_url: Option<String>,
    storage_token: Option<String>,
    storage_public_url: Option<String>,
    storage_bucket: String,
    audio_dir: PathBuf,
    public_audio_base_url: String,
    timezone: Tz,
    recency_window_days: i64,
    selection_policy: SelectionPolicy,
    scoring_settings: ScoringSettings,
}

impl Config {
    fn from_cli(cli: Cli) -> (Config, Command) {
        let config = Config {
            db_url: cli.database_url,
            openai_key: cli.openai_key,
            openrouter_key: cli.openrouter_key,
            provider: cli.provider,
            model: cli.model,
            voice: cli.voice,
            slack_webhook_url: cli.slack_webhook_url,
            storage_url: cli.storage_url,
            storage_token: cli.storage_token,
            storage_public_url: cli.storage_public_url,
            storage_bucket: cli.storage_bucket,
            audio_dir: cli.audio_dir,
            public_audio_base_url: cli.public_audio_base_url,
            timezone: cli.timezone,
            recency_window_days: cli.recency_window_days,
            selection_policy: SelectionPolicy {
                min_score: cli.min_score,
                min_items: cli.min_items,
                max_items: cli.max_items,
            },
            scoring_settings: ScoringSettings {
                max_candidates: cli.scoring_max_candidates,
                max_output_tokens: cli.scoring_max_output_tokens,
            },
        };

        (config, cli.command)
    }

    fn provider_key(&self, provider: LlmProvider) -> anyhow::Result<&str> {
        match provider {
            LlmProvider::OpenAi => Ok(&self.openai_key),
            LlmProvider::OpenRouter => self
                .openrouter_key
                .as_deref()
                .context("OPENROUTER_API_KEY is required for the openrouter provider"),
        }
    }

    fn text_generator(&self, provider: LlmProvider) -> anyhow::Result<OpenAIClient> {
        let client = OpenAIClient::for_provider(provider, self.provider_key(provider)?);
        Ok(match &self.model {
            Some(model) => client.with_model(model),
            None => client,
        })
    }

    fn blob_store(&self) -> ConfiguredBlobStore {
        match &self.storage_url {
            Some(url) => {
                let mut store = HttpBlobStore::new(url).with_bucket(&self.storage_bucket);
                if let Some(public_url) = &self.storage_public_url {
                    store = store.with_public_base_url(public_url);
                }
                if let Some(token) = &self.storage_token {
                    store = store.with_token(token);
                }
                ConfiguredBlobStore::Http(store)
            }
            None => ConfiguredBlobStore::Fs(FsBlobStore::new(
                &self.audio_dir,
                &self.public_audio_base_url,
            )),
        }
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        match &self.slack_webhook_url {
            Some(url) => Arc::new(SlackWebhook::new(url)),
            None => Arc::new(NoopNotifier),
        }
    }
}

type ConfiguredPipeline =
    BriefingPipeline<PgDataStore, OpenAIClient, OpenAIClient, ConfiguredBlobStore>;

async fn build_pipeline(
    config: &Config,
    provider: LlmProvider,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<ConfiguredPipeline> {
    let generator = config.text_generator(provider)?;
    let store = PgDataStore::init(&config.db_url)
        .await
        .context("Failed to connect to the database")?;

    let collector = Collector::default()
        .with_adapter(FeedAdapter::default())
        .with_recency_window(chrono::Duration::days(config.recency_window_days));

    let pipeline = BriefingPipelineBuilder::new()
        .store(store)
        .generator(generator)
        .audio_synthesizer(OpenAIClient::new(&config.openai_key))
        .blob_store(config.blob_store())
        .collector(collector)
        .shared_notifier(notifier)
        .selection_policy(config.selection_policy)
        .scoring_settings(config.scoring_settings)
        .voice(VoiceConfig::default().with_voice(&config.voice))
        .timezone(config.timezone)
        .provider(provider)
        .build();

    Ok(pipeline)
}

async fn run_pipeline(
    config: &Config,
    provider: Option<LlmProvider>,
    progress: Option<&dyn ProgressSink>,
) -> anyhow::Result<Option<Episode>> {
    let provider = provider.unwrap_or(config.provider);
    let notifier = config.notifier();

    match build_pipeline(config, provider, notifier.clone()).await {
        Ok(pipeline) => pipeline.run(progress).await,
        Err(e) => {
            report_setup_failure(&*notifier, progress, &e).await;
            Err(e)
        }
    }
}

struct ConfiguredLauncher {
    config: Config,
}

#[async_trait]
impl PipelineLauncher for ConfiguredLauncher {
    fn validate(&self, provider: Option<LlmProvider>) -> anyhow::Result<()> {
        self.config
            .provider_key(provider.unwrap_or(self.config.provider))
            .map(drop)
    }

    async fn launch(
        &self,
        provider: Option<LlmProvider>,
        progress: &dyn ProgressSink,
    ) -> anyhow::Result<Option<Episode>> {
        run_pipeline(&self.config, provider, Some(progress)).await
    }
}

async fn handle_tick(_tick: Tick, config: Data<Config>) -> anyhow::Result<()> {
    tracing::info!(provider = %config.provider, "Running scheduled pipeline...");
    run_pipeline(&config, None, None).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let _guard = sentry::init((
        std::env::var("SENTRY_DSN").unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some("production".into()),
            ..Default::default()
        },
    ));

    let cli = Cli::parse();
    init_tracing_subscriber()?;

    let (config, command) = Config::from_cli(cli);

    match command {
        Command::Run { provider } => {
            tracing::info!(provider = ?provider, "Running pipeline once...");
            match run_pipeline(&config, provider, None).await? {
                Some(episode) => tracing::info!(episode_id = %episode.id, "Episode generated"),
                None => tracing::info!("Nothing to publish today"),
            }
        }
        Command::Cron { schedule, retries } => {
            tracing::info!(%schedule, retries, "Starting cron scheduler...");
            let schedule = Schedule::from_str(&schedule)?;

            let worker = WorkerBuilder::new("briefing-pulse-cron")
                .backend(CronStream::new(schedule))
                .retry(RetryPolicy::retries(retries))
                .layer(SentryLayer::new())
                .data(config)
                .build(handle_tick);

            worker.run().await?;
        }
        Command::Serve { bind } => {
            let token = CancellationToken::new();
            let shutdown = token.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = ?e, "Failed to listen for shutdown signal");
                }
                shutdown.cancel();
            });

            let app = router(AppState::new(ConfiguredLauncher { config }));
            let listener = tokio::net::TcpListener::bind(bind).await?;
            tracing::info!(%bind, "Serving trigger API");

            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await?;
        }
    }

    Ok(())
}
