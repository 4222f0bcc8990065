use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    migrate::Migrator, postgres::PgPoolOptions, types::Json, PgPool, Postgres, QueryBuilder,
};
use uuid::Uuid;

use crate::{
    datastore::DataStore, CandidateItem, DomainError, Episode, EpisodeStatus, NewEpisode, RawItem,
    RecentItemKey, SearchQuery, Section, Source,
};

static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(Debug, Clone)]
pub struct PgDataStore {
    pub pool: PgPool,
}

impl PgDataStore {
    /// Rows per INSERT statement; keeps bind parameters well under the postgres limit
    const INSERT_BATCH_SIZE: usize = 500;

    /// Establish connection to database and run pending migrations
    pub async fn init(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .inspect_err(
                |e| tracing::error!(error = ?e, "Failed to establish connection to database"),
            )
            .context("Failed to connect to postgres database")?;

        MIGRATOR
            .run(&pool)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, "Failed to run database migrations"))
            .context("Failed to run database migrations")?;

        Ok(PgDataStore { pool })
    }

    /// Moves `episode_id` to `next` if its current status allows it
    async fn transition_episode(
        &self,
        episode_id: Uuid,
        next: EpisodeStatus,
        audio: Option<(&str, i32)>,
        failure_reason: Option<&str>,
    ) -> anyhow::Result<()> {
        let allowed_from = EpisodeStatus::ALL
            .iter()
            .filter(|s| s.can_advance_to(next))
            .map(|s| s.as_str())
            .collect::<Vec<_>>();

        let (audio_url, audio_duration) = audio.unzip();

        let result = sqlx::query(
            r#"
            UPDATE episodes
            SET status = $2,
                audio_url = COALESCE($3, audio_url),
                audio_duration_seconds = COALESCE($4, audio_duration_seconds),
                metadata = CASE
                    WHEN $5::TEXT IS NULL THEN metadata
                    ELSE metadata || jsonb_build_object('failure_reason', $5::TEXT)
                END,
                updated_at = now()
            WHERE id = $1 AND status = ANY($6)
            "#,
        )
        .bind(episode_id)
        .bind(next.as_str())
        .bind(audio_url)
        .bind(audio_duration)
        .bind(failure_reason)
        .bind(&allowed_from[..])
        .execute(&self.pool)
        .await
        .inspect_err(|e| {
            tracing::error!(error = ?e, %episode_id, status = %next, "Failed to update episode status")
        })
        .context("Failed to update episode status")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Episode {episode_id} cannot transition to {next}");
        }

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    name: String,
    url: String,
    source_type: String,
    category: Option<String>,
    active: bool,
    config: serde_json::Value,
}

impl TryFrom<SourceRow> for Source {
    type Error = DomainError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        Ok(Source {
            id: row.id,
            name: row.name,
            url: row.url,
            source_type: row.source_type.parse()?,
            category: row.category,
            active: row.active,
            config: row.config,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EpisodeRow {
    id: Uuid,
    date: NaiveDate,
    script: String,
    clean_script: String,
    summary: String,
    sections: Json<Vec<Section>>,
    source_item_ids: Vec<String>,
    audio_url: Option<String>,
    audio_duration_seconds: Option<i32>,
    status: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<EpisodeRow> for Episode {
    type Error = DomainError;

    fn try_from(row: EpisodeRow) -> Result<Self, Self::Error> {
        Ok(Episode {
            id: row.id,
            date: row.date,
            script: row.script,
            clean_script: row.clean_script,
            summary: row.summary,
            sections: row.sections.0,
            source_item_ids: row.source_item_ids,
            audio_url: row.audio_url,
            audio_duration_seconds: row.audio_duration_seconds,
            status: row.status.parse()?,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

impl DataStore for PgDataStore {
    async fn active_sources(&self) -> anyhow::Result<Vec<Source>> {
        let rows = sqlx::query_as::<_, SourceRow>(
            "SELECT id, name, url, source_type, category, active, config FROM sources WHERE active",
        )
        .fetch_all(&self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = ?e, "Failed to fetch active sources"))
        .context("Failed to fetch active sources")?;

        // skip misconfigured rows rather than failing the whole collection
        let sources = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                Source::try_from(row)
                    .inspect_err(|e| tracing::warn!(error = %e, source_id = %id, "Skipping source"))
                    .ok()
            })
            .collect();

        Ok(sources)
    }

    async fn active_search_queries(&self) -> anyhow::Result<Vec<SearchQuery>> {
        #[derive(sqlx::FromRow)]
        struct SearchQueryRow {
            id: Uuid,
            query: String,
            category: Option<String>,
            active: bool,
            added_by: Option<String>,
        }

        let rows = sqlx::query_as::<_, SearchQueryRow>(
            "SELECT id, query, category, active, added_by FROM search_queries WHERE active",
        )
        .fetch_all(&self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = ?e, "Failed to fetch search queries"))
        .context("Failed to fetch search queries")?;

        Ok(rows
            .into_iter()
            .map(|row| SearchQuery {
                id: row.id,
                query: row.query,
                category: row.category,
                active: row.active,
                added_by: row.added_by,
            })
            .collect())
    }

    async fn recent_item_keys(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<RecentItemKey>> {
        #[derive(sqlx::FromRow)]
        struct KeyRow {
            url: Option<String>,
            title: String,
        }

        let rows = sqlx::query_as::<_, KeyRow>(
            "SELECT url, title FROM raw_items WHERE fetched_at >= $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = ?e, "Failed to fetch recent raw items"))
        .context("Failed to fetch recent raw items")?;

        Ok(rows
            .into_iter()
            .map(|row| RecentItemKey::new(row.url, &row.title))
            .collect())
    }

    async fn bulk_insert_raw_items(&self, items: &[CandidateItem]) -> anyhow::Result<Vec<RawItem>> {
        let fetched_at = Utc::now();
        let mut inserted = Vec::with_capacity(items.len());

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin raw item transaction")?;

        for chunk in items.chunks(Self::INSERT_BATCH_SIZE) {
            let rows = chunk
                .iter()
                .map(|item| (Uuid::new_v4(), item.clone()))
                .collect::<Vec<_>>();

            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO raw_items (id, source_id, source_type, title, url, content, \
                 content_snippet, published_at, fetched_at, metadata) ",
            );
            builder.push_values(&rows, |mut b, (id, item)| {
                b.push_bind(*id)
                    .push_bind(item.source_id)
                    .push_bind(item.source_type.as_str())
                    .push_bind(item.title.clone())
                    .push_bind(item.url.clone())
                    .push_bind(item.content.clone())
                    .push_bind(item.content_snippet.clone())
                    .push_bind(item.published_at)
                    .push_bind(fetched_at)
                    .push_bind(item.metadata.clone());
            });

            builder
                .build()
                .execute(&mut *tx)
                .await
                .inspect_err(|e| tracing::error!(error = ?e, "Failed to insert raw items"))
                .context("Failed to insert raw items")?;

            inserted.extend(
                rows.into_iter()
                    .map(|(id, item)| RawItem::from_candidate(id, fetched_at, item)),
            );
        }

        tx.commit()
            .await
            .context("Failed to commit raw item transaction")?;

        Ok(inserted)
    }

    async fn create_episode(&self, episode: &NewEpisode) -> anyhow::Result<Episode> {
        let row = sqlx::query_as::<_, EpisodeRow>(
            r#"
            INSERT INTO episodes (id, date, script, clean_script, summary, sections, source_item_ids, status, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, date, script, clean_script, summary, sections, source_item_ids,
                      audio_url, audio_duration_seconds, status, metadata, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(episode.date)
        .bind(&episode.script)
        .bind(&episode.clean_script)
        .bind(&episode.summary)
        .bind(Json(&episode.sections))
        .bind(&episode.source_item_ids)
        .bind(EpisodeStatus::Pending.as_str())
        .bind(&episode.metadata)
        .fetch_one(&self.pool)
        .await
        .inspect_err(|e| {
            tracing::error!(error = ?e, date = %episode.date, "Failed to create episode")
        })
        .context("Failed to create episode")?;

        Ok(Episode::try_from(row)?)
    }

    async fn advance_episode_status(
        &self,
        episode_id: Uuid,
        status: EpisodeStatus,
    ) -> anyhow::Result<()> {
        self.transition_episode(episode_id, status, None, None).await
    }

    async fn mark_episode_generated(
        &self,
        episode_id: Uuid,
        audio_url: &str,
        audio_duration_seconds: i32,
    ) -> anyhow::Result<()> {
        self.transition_episode(
            episode_id,
            EpisodeStatus::Generated,
            Some((audio_url, audio_duration_seconds)),
            None,
        )
        .await
    }

    async fn mark_episode_failed(&self, episode_id: Uuid, reason: &str) -> anyhow::Result<()> {
        self.transition_episode(episode_id, EpisodeStatus::Failed, None, Some(reason))
            .await
    }

    async fn attach_item_to_episode(
        &self,
        item_id: Uuid,
        episode_id: Uuid,
        relevance_score: f64,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE raw_items SET episode_id = $2, relevance_score = $3 WHERE id = $1")
            .bind(item_id)
            .bind(episode_id)
            .bind(relevance_score)
            .execute(&self.pool)
            .await
            .inspect_err(|e| {
                tracing::error!(error = ?e, %item_id, %episode_id, "Failed to attach raw item")
            })
            .context("Failed to attach raw item to episode")?;

        Ok(())
    }

    async fn recent_generated_episodes(&self, limit: usize) -> anyhow::Result<Vec<Episode>> {
        let rows = sqlx::query_as::<_, EpisodeRow>(
            r#"
            SELECT id, date, script, clean_script, summary, sections, source_item_ids,
                   audio_url, audio_duration_seconds, status, metadata, created_at
            FROM episodes
            WHERE status = 'generated'
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = ?e, "Failed to fetch recent episodes"))
        .context("Failed to fetch recent episodes")?;

        rows.into_iter()
            .map(|row| Episode::try_from(row).map_err(anyhow::Error::from))
            .collect()
    }
}
