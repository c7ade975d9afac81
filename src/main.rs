mod analytics;
mod app;
mod auth;
mod engine;
mod error;
mod sequencer;
mod settings;
mod types;

#[tokio::main]
async fn main() {
    app::run().await;
}
