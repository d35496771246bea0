use std::sync::Arc;

use lambda_http::{run, service_fn, Error, Request};
use slidemap_shared::{AppState, Config};

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_http::tracing::init_default_subscriber();

    let state = Arc::new(AppState::new(Config::from_env())?);

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
