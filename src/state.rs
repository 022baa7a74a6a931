use std::sync::Arc;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::analysis::{AnalysisPipeline, PgAnalysisRepo, PipelineSettings};
use crate::config::{AppConfig, CacheBackend};
use crate::nutrition::cache::{CacheStore, MemoryCache, PgCache};
use crate::nutrition::sources::{NutritionixClient, UsdaClient};
use crate::nutrition::{NutritionResolver, ResolverSettings};
use crate::ratelimit::RateGovernor;
use crate::storage::{Storage, StorageClient};
use crate::vision::{OpenAiVision, VisionDetector};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub governor: Arc<RateGovernor>,
    pub resolver: Arc<NutritionResolver>,
    pub pipeline: AnalysisPipeline,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        let cache: Arc<dyn CacheStore> = match config.nutrition.cache_backend {
            CacheBackend::Memory => Arc::new(MemoryCache::new()),
            CacheBackend::Postgres => Arc::new(PgCache::new(db.clone())),
        };
        let n = &config.nutrition;
        let primary = Arc::new(UsdaClient::new(
            &n.usda_base_url,
            &n.usda_api_key,
            n.primary_timeout(),
        )?);
        let secondary = Arc::new(NutritionixClient::new(
            &n.nutritionix_base_url,
            &n.nutritionix_app_id,
            &n.nutritionix_app_key,
            n.secondary_timeout(),
        )?);
        let resolver = Arc::new(NutritionResolver::new(
            cache,
            primary,
            secondary,
            ResolverSettings::from(n),
        ));

        let model = Arc::new(OpenAiVision::new(&config.vision)?);
        let detector = Arc::new(VisionDetector::new(model, config.vision.timeout()));

        // Реальный S3/MinIO
        let storage = Arc::new(Storage::new(&config.storage, "us-east-1").await?) as Arc<dyn StorageClient>;
        let repo = Arc::new(PgAnalysisRepo::new(db.clone()));
        let pipeline = AnalysisPipeline::new(
            detector,
            resolver.clone(),
            repo,
            Some(storage),
            PipelineSettings::from(config.as_ref()),
        );

        let governor = Arc::new(RateGovernor::new(config.rate_limit.clone()));
        info!(
            cache = ?config.nutrition.cache_backend,
            workers = config.analysis_workers,
            "application state ready"
        );

        Ok(Self {
            db,
            config,
            governor,
            resolver,
            pipeline,
        })
    }
}

#[cfg(test)]
impl AppState {
    /// Offline state: lazy pool, in-memory cache and repo, scripted
    /// collaborators. Must be built inside a tokio runtime.
    pub fn for_tests() -> Self {
        Self::for_tests_with(AppConfig::for_tests())
    }

    pub fn for_tests_with(config: AppConfig) -> Self {
        use crate::analysis::repo::tests::MemoryAnalysisRepo;
        use crate::nutrition::resolver::tests::{apple_per_100g, Behaviour, FakePrimary, FakeSecondary};
        use crate::vision::detector::tests::ScriptedModel;

        let db = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool ok");

        let resolver = Arc::new(NutritionResolver::new(
            Arc::new(MemoryCache::new()),
            FakePrimary::new(Behaviour::Found(apple_per_100g())),
            FakeSecondary::new(Behaviour::NotFound),
            ResolverSettings::from(&config.nutrition),
        ));
        let model = ScriptedModel::replying(
            r#"{"foods":[{"name":"apple","estimated_portion_grams":150,"confidence":8}]}"#,
        );
        let detector = Arc::new(VisionDetector::new(model, config.vision.timeout()));
        let pipeline = AnalysisPipeline::new(
            detector,
            resolver.clone(),
            Arc::new(MemoryAnalysisRepo::default()),
            None,
            PipelineSettings::from(&config),
        );

        Self {
            db,
            governor: Arc::new(RateGovernor::new(config.rate_limit.clone())),
            config: Arc::new(config),
            resolver,
            pipeline,
        }
    }
}
