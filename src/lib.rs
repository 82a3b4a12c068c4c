pub mod config;
pub mod domain;
pub mod email_client;
pub mod news_client;
pub mod render;
pub mod routes;
pub mod scheduler;
pub mod startup;
pub mod store;
pub mod summarizer_client;
pub mod telemetry;
pub mod workflow;
