mod config;
mod error;
mod handlers;
mod models;
mod routes;
mod service;

#[cfg(test)]
mod tests;

use axum::{body::Body, extract::Request, response::Response, Router};
use lambda_http::{
    run, service_fn, Body as LambdaBody, Error, Request as LambdaRequest,
    Response as LambdaResponse,
};
use prometheus::Registry;
use tower::ServiceExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use user_api_shared::telemetry::Telemetry;

// The Lambda handler function
async fn function_handler(
    app: Router,
    event: LambdaRequest,
) -> Result<LambdaResponse<LambdaBody>, Error> {
    tracing::info!(
        "Received Lambda request: method={:?}, path={:?}",
        event.method(),
        event.uri().path()
    );

    // Convert the Lambda event to an HTTP request for Axum
    let (parts, body) = event.into_parts();
    let body = match body {
        LambdaBody::Empty => Body::empty(),
        LambdaBody::Text(text) => Body::from(text),
        LambdaBody::Binary(data) => {
            tracing::debug!("Request body (binary): {} bytes", data.len());
            Body::from(data)
        }
    };

    let response = app.oneshot(Request::from_parts(parts, body)).await?;

    let lambda_response = response_to_lambda(response).await?;
    tracing::info!(
        "Returning Lambda response: status={}",
        lambda_response.status()
    );

    Ok(lambda_response)
}

// Convert the Axum response to a format suitable for Lambda
async fn response_to_lambda(response: Response) -> Result<LambdaResponse<LambdaBody>, Error> {
    let (parts, body) = response.into_parts();

    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!("Failed to read response body: {:?}", err);
            return Err(err.into());
        }
    };

    let builder = parts
        .headers
        .iter()
        .fold(LambdaResponse::builder().status(parts.status), |builder, (name, value)| {
            builder.header(name.as_str(), value.as_bytes())
        });

    let lambda_response = if bytes.is_empty() {
        builder.body(LambdaBody::Empty)?
    } else {
        builder.body(LambdaBody::Binary(bytes.to_vec()))?
    };

    Ok(lambda_response)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,user_api_service=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        // CloudWatch does not render ANSI colours
        .with_ansi(!config.is_lambda())
        .with_target(true)
        .init();

    tracing::info!("Starting user service with {:?} store", config.store);

    let telemetry = Telemetry::new(Registry::new())?;
    let app = routes::create_router(&config, telemetry).await?;

    if let Some(function_name) = &config.lambda_function {
        tracing::info!(
            "Starting AWS Lambda function: {} (version: {})",
            function_name,
            std::env::var("AWS_LAMBDA_FUNCTION_VERSION").unwrap_or_else(|_| "unknown".into())
        );
        run(service_fn(move |event| function_handler(app.clone(), event))).await?;
    } else {
        let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
        tracing::info!("Listening on {}", config.bind_addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    tracing::info!("User service stopped");
    Ok(())
}
