use anyhow::{Context, Result};

use linkgate::config::Config;
use linkgate::handler::RequestHandler;

use super::RequestArgs;

/// Print the link for the current request, or `{}` when there is none
pub async fn link(config: Config, request: RequestArgs) -> Result<()> {
    let handler = RequestHandler::from_config(&config)?;
    let ctx = request.into_context();

    let output = match handler.handle(&ctx).await {
        Some(result) => serde_json::to_string(&result).context("Failed to encode link")?,
        None => String::from("{}"),
    };
    println!("{output}");
    Ok(())
}

/// Print up to `count` links as a JSON array
///
/// Without `fresh` at most one link is handed out, like [`link`]. With it
/// the links are allocated and reported as one batch.
pub async fn links(config: Config, request: RequestArgs, count: usize, fresh: bool) -> Result<()> {
    let handler = RequestHandler::from_config(&config)?;
    let ctx = request.into_context();

    let results = if fresh {
        handler.handle_batch(&ctx, count).await
    } else {
        handler.handle_many(&ctx, count).await
    };

    println!(
        "{}",
        serde_json::to_string(&results).context("Failed to encode links")?
    );
    Ok(())
}

/// Print the identity the request is classified as
pub async fn classify(config: Config, request: RequestArgs) -> Result<()> {
    let handler = RequestHandler::from_config(&config)?;
    let ctx = request.into_context();

    let identity = handler.classify(&ctx).await;
    println!("{identity}");
    Ok(())
}
