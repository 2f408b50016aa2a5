use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;

use linkgate::config::Config;

use super::{open_backend, resolve_site};

/// Register the site with the coordinator
pub async fn register(config: Config, site: Option<String>) -> Result<()> {
    let site = resolve_site(&config, site)?;
    let (_store, client) = open_backend(&config)?;

    client
        .register(&site)
        .await
        .with_context(|| format!("Failed to register {site}"))?;

    println!("Registered {site}");
    Ok(())
}

/// Show cached state of the site
pub async fn status(config: Config, site: Option<String>) -> Result<()> {
    let site = resolve_site(&config, site)?;
    let (store, _client) = open_backend(&config)?;

    let queue = store.cached_queue(&site)?;
    let used = store.get_used(&site)?;
    let now = Utc::now();

    let report = json!({
        "site": site,
        "registered": store.is_registered(&site),
        "queue": queue.as_ref().map(|cache| json!({
            "links": cache.links.len(),
            "fetched_at": cache.fetched_at,
            "age_secs": cache.age(now).as_secs(),
            "fresh": cache.age(now) <= store.settings().queue_ttl,
        })),
        "used": used.len(),
    });

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Print the queue, fetching it from the coordinator when asked to
pub async fn queue(config: Config, site: Option<String>, refresh: bool) -> Result<()> {
    let site = resolve_site(&config, site)?;
    let (store, client) = open_backend(&config)?;

    let links = if refresh {
        let links = client
            .fetch_queue(&site)
            .await
            .with_context(|| format!("Failed to fetch queue for {site}"))?;
        store.refresh_queue(&site, links)?.links
    } else {
        store.get_queue(&site, &client).await.links
    };

    println!("{}", serde_json::to_string_pretty(&links)?);
    Ok(())
}
