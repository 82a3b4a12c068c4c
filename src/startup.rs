use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::net::TcpListener;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_actix_web::TracingLogger;

use crate::config::{DatabaseSettings, Settings};
use crate::email_client::{EmailClient, EmailSender};
use crate::news_client::{ContentFetcher, NewsClient};
use crate::routes::{health_check, sync_user, trigger_newsletter, ApiToken};
use crate::scheduler::{spawn_scan_loop, Dispatcher, RetryPolicy, WorkflowWorker};
use crate::store::{NewsletterStore, PostgresStore};
use crate::summarizer_client::{Summarizer, SummarizerClient};
use crate::workflow::{NewsletterWorkflow, RedisStepCache, StepCache};

/// HTTP server plus the background worker and scan loop feeding the workflow.
pub struct Application {
    port: u16,
    server: Server,
    dispatcher: Dispatcher,
    background_tasks: Vec<JoinHandle<()>>,
}

#[derive(thiserror::Error)]
pub enum ApplicationError {
    #[error("Failed to bind the server: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to build an HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("Failed to create the Redis client: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Sender email is not valid: {0}")]
    InvalidSenderEmail(String),
    #[error("API token cannot be used: {0}")]
    InvalidApiToken(String),
}

impl std::fmt::Debug for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

impl Application {
    /// Builds the application against Postgres and Redis.
    pub async fn build(config: Settings) -> Result<Self, ApplicationError> {
        let db_pool = get_connection_db_pool(&config.database);
        let redis_client = redis::Client::open(config.get_redis_address())?;

        let store: Arc<dyn NewsletterStore> = Arc::new(PostgresStore::new(db_pool));
        let step_cache: Arc<dyn StepCache> =
            Arc::new(RedisStepCache::new(redis_client, config.redis.step_ttl()));

        Self::build_with(config, store, step_cache).await
    }

    /// Builds the application with the given persistence, e.g. the in-memory store and cache.
    pub async fn build_with(
        config: Settings,
        store: Arc<dyn NewsletterStore>,
        step_cache: Arc<dyn StepCache>,
    ) -> Result<Self, ApplicationError> {
        let sender_email = config
            .email_client
            .get_sender_email()
            .map_err(ApplicationError::InvalidSenderEmail)?;
        let email_client: Arc<dyn EmailSender> = Arc::new(EmailClient::new(
            config.email_client.base_url.clone(),
            sender_email,
            config.email_client.api_key.clone(),
            Some(config.email_client.timeout()),
        )?);
        let news_client: Arc<dyn ContentFetcher> = Arc::new(NewsClient::new(
            config.news_client.base_url.clone(),
            config.news_client.api_key.clone(),
            config.news_client.articles_per_category,
            config.news_client.max_articles,
            Some(config.news_client.timeout()),
        )?);
        let summarizer: Arc<dyn Summarizer> = Arc::new(SummarizerClient::new(
            config.summarizer.base_url.clone(),
            config.summarizer.api_key.clone(),
            config.summarizer.model.clone(),
            Some(config.summarizer.timeout()),
        )?);

        let workflow = Arc::new(NewsletterWorkflow::new(
            store.clone(),
            news_client,
            summarizer,
            email_client,
            step_cache,
            config.scheduler.step_timeout(),
        ));

        let (dispatcher, receiver) = Dispatcher::new(config.scheduler.queue_capacity);
        let worker = WorkflowWorker::new(
            workflow,
            dispatcher.clone(),
            receiver,
            config.scheduler.max_concurrent_executions,
            RetryPolicy {
                max_attempts: config.scheduler.max_attempts,
                base_delay: config.scheduler.retry_base_delay(),
            },
        );
        let mut background_tasks = vec![worker.spawn()];
        if config.scheduler.scan_enabled {
            background_tasks.push(spawn_scan_loop(
                store.clone(),
                dispatcher.clone(),
                config.scheduler.scan_interval(),
                config.scheduler.scan_batch_size,
            ));
        }

        let listener = TcpListener::bind(config.get_address())?;
        let port = listener.local_addr()?.port();
        let server = run(
            listener,
            store,
            dispatcher.clone(),
            ApiToken::new(&config.application.api_token)
                .map_err(|err| ApplicationError::InvalidApiToken(err.to_string()))?,
        )?;

        tracing::info!("Server listening on {}", config.get_address());

        Ok(Self {
            port,
            server,
            dispatcher,
            background_tasks,
        })
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub async fn run_until_stop(self) -> Result<(), std::io::Error> {
        let result = self.server.await;

        for task in self.background_tasks {
            task.abort();
        }

        result
    }
}

pub fn run(
    listener: TcpListener,
    store: Arc<dyn NewsletterStore>,
    dispatcher: Dispatcher,
    api_token: ApiToken,
) -> Result<Server, std::io::Error> {
    let store = web::Data::new(store);
    let dispatcher = web::Data::new(dispatcher);
    let api_token = web::Data::new(api_token);

    let server = HttpServer::new(move || {
        App::new()
            // Logs every incoming request with its own span
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .route("/newsletters/trigger", web::post().to(trigger_newsletter))
            .route("/users/sync", web::post().to(sync_user))
            .app_data(store.clone())
            .app_data(dispatcher.clone())
            .app_data(api_token.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

pub fn get_connection_db_pool(config: &DatabaseSettings) -> Pool<Postgres> {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(config.get_db_options())
}
