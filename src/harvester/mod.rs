//! Collection harvesting from remote STAC catalogs
//!
//! A harvest reads every page of `{catalog}/collections` (following `next`
//! links), drops collections whose items link is missing, unreachable or
//! empty, converts the rest into [`StacCollection`] values and writes them in
//! a single transaction:
//!
//! ```text
//! /collections (all pages) ──▶ items check ──▶ StacCollection::from_value ──▶ upsert + retire (one tx)
//! ```
//!
//! A timestamp that cannot be converted aborts the whole catalog batch and
//! nothing from that batch is committed. Structurally incomplete collections
//! are skipped with a warning. Local collections are only retired when the
//! listing was read to its last page.
//!
//! Discovery ([`discovery`]) feeds [`CollectionHarvester::sync_candidates`],
//! which validates ([`validator`]) and harvests candidates concurrently.

pub mod discovery;
pub mod validator;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use url::Url;

use crate::catalog::{CatalogRegistry, CollectionStore};
use crate::config::HarvesterConfig;
use crate::error::{Error, Result};
use crate::models::{Catalog, NewCatalog};
use crate::stac::client::collections_url;
use crate::stac::extent::{find_link, items_link};
use crate::stac::{Link, ParsedCollection, StacClient, StacCollection};
use crate::storage::Database;

pub use discovery::{discover_candidates, CatalogCandidate};
pub use validator::validate;

/// Counts of one catalog harvest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    pub catalog_id: i64,
    /// Collections inserted or updated
    pub indexed: usize,
    /// Collections not indexed (empty, unreachable items or incomplete document)
    pub skipped: usize,
    /// Local collections removed because the remote no longer lists them
    pub retired: Vec<String>,
}

/// Outcome of a discovery sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub candidates: usize,
    pub harvested: usize,
    pub rejected: usize,
    pub failed: usize,
    pub collections_indexed: usize,
}

/// Upper bound on `/collections` pages read for one catalog
const MAX_COLLECTION_PAGES: usize = 200;

/// One page of a `/collections` response
#[derive(Debug, Deserialize)]
struct CollectionsPage {
    collections: Vec<Value>,
    stac_version: Option<String>,
    #[serde(default)]
    links: Vec<Link>,
}

/// Every collection document a catalog lists
#[derive(Debug, Default)]
struct CollectionListing {
    documents: Vec<Value>,
    stac_version: Option<String>,
    /// False when paging stopped before the last page
    complete: bool,
}

enum CandidateOutcome {
    Harvested(HarvestReport),
    Rejected,
    Failed,
}

/// Harvests collections into the local index
#[derive(Clone)]
pub struct CollectionHarvester {
    client: Arc<StacClient>,
    registry: CatalogRegistry,
    db: Database,
    index_url: String,
    max_concurrent: usize,
    /// Bounds concurrent harvests across sync and manual refresh
    permits: Arc<Semaphore>,
}

impl CollectionHarvester {
    pub fn new(client: Arc<StacClient>, db: Database, config: &HarvesterConfig) -> Self {
        let max_concurrent = config.max_concurrent_harvests.max(1);
        Self {
            client,
            registry: CatalogRegistry::new(db.clone()),
            db,
            index_url: config.catalog_index_url.clone(),
            max_concurrent,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Remote catalog reader
    pub fn client(&self) -> &StacClient {
        &self.client
    }

    /// Public, API-accessible catalogs listed by the configured index
    pub async fn discover(&self) -> Result<Vec<CatalogCandidate>> {
        discover_candidates(&self.client, &self.index_url).await
    }

    /// Discover and harvest every public catalog
    pub async fn sync_public_catalogs(&self) -> Result<SyncReport> {
        let candidates = self.discover().await?;
        Ok(self.sync_candidates(candidates).await)
    }

    /// Validate and harvest `candidates`, a bounded number at a time
    ///
    /// Individual failures are logged and counted, never raised.
    pub async fn sync_candidates(&self, candidates: Vec<CatalogCandidate>) -> SyncReport {
        let mut report = SyncReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        let outcomes = stream::iter(candidates)
            .map(|candidate| async move { self.sync_one(candidate).await })
            .buffer_unordered(self.max_concurrent)
            .collect::<Vec<_>>()
            .await;

        for outcome in outcomes {
            match outcome {
                CandidateOutcome::Harvested(harvest) => {
                    report.harvested += 1;
                    report.collections_indexed += harvest.indexed;
                }
                CandidateOutcome::Rejected => report.rejected += 1,
                CandidateOutcome::Failed => report.failed += 1,
            }
        }

        tracing::info!(
            candidates = report.candidates,
            harvested = report.harvested,
            rejected = report.rejected,
            failed = report.failed,
            collections = report.collections_indexed,
            "Public catalog sync finished"
        );
        report
    }

    async fn sync_one(&self, candidate: CatalogCandidate) -> CandidateOutcome {
        if !validate(&self.client, &candidate.url).await {
            crate::metrics::record_harvest_result("rejected", 0.0);
            return CandidateOutcome::Rejected;
        }

        match self
            .harvest_url(&candidate.title, &candidate.url, &candidate.summary)
            .await
        {
            Ok(report) => CandidateOutcome::Harvested(report),
            Err(e) => {
                tracing::warn!(url = %candidate.url, error = %e, "Catalog harvest failed");
                CandidateOutcome::Failed
            }
        }
    }

    /// Harvest `url`, registering it first unless already registered
    pub async fn harvest_url(&self, name: &str, url: &str, description: &str) -> Result<HarvestReport> {
        let catalog = match self.registry.get_by_url(url)? {
            Some(existing) => {
                tracing::debug!(catalog_id = existing.id, "Catalog already registered, harvesting in place");
                existing
            }
            None => self
                .registry
                .register(&NewCatalog::new(name, url, description))?,
        };
        self.harvest(&catalog).await
    }

    /// Harvest one registered catalog
    pub async fn harvest(&self, catalog: &Catalog) -> Result<HarvestReport> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::other("Harvest semaphore closed"))?;

        let started = Instant::now();
        let result = self.harvest_catalog(catalog).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(report) => {
                crate::metrics::record_harvest(report.indexed, report.skipped, report.retired.len());
                crate::metrics::record_harvest_result("success", elapsed);
                tracing::info!(
                    catalog_id = catalog.id,
                    url = %catalog.url,
                    indexed = report.indexed,
                    skipped = report.skipped,
                    retired = report.retired.len(),
                    "Catalog harvested"
                );
            }
            Err(e) => {
                crate::metrics::record_harvest_result("failed", elapsed);
                tracing::warn!(catalog_id = catalog.id, url = %catalog.url, error = %e, "Catalog harvest aborted");
            }
        }
        result
    }

    /// Read `{catalog}/collections`, following `next` links
    ///
    /// A failing first page is an error. A failing later page, a cycle or the
    /// page cap ends the listing early and marks it incomplete.
    async fn list_collections(&self, catalog: &Catalog) -> Result<CollectionListing> {
        let mut listing = CollectionListing::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut url = collections_url(&catalog.url);

        for page_number in 1..=MAX_COLLECTION_PAGES {
            visited.insert(url.clone());
            let page = match self.fetch_collections_page(&url).await {
                Ok(page) => page,
                Err(e) if page_number == 1 => return Err(e),
                Err(e) => {
                    tracing::warn!(url = %url, page = page_number, error = %e, "Collections page unreadable, listing is incomplete");
                    return Ok(listing);
                }
            };

            if listing.stac_version.is_none() {
                listing.stac_version = page.stac_version.clone().or_else(|| {
                    page.collections
                        .first()
                        .and_then(|doc| doc.get("stac_version"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
            }
            listing.documents.extend(page.collections);

            let Some(next) = next_page_url(&url, &page.links) else {
                listing.complete = true;
                return Ok(listing);
            };
            if visited.contains(&next) {
                tracing::warn!(url = %next, "Collections paging loops back, listing is incomplete");
                return Ok(listing);
            }
            tracing::debug!(url = %next, page = page_number + 1, "Following collections next link");
            url = next;
        }

        tracing::warn!(url = %catalog.url, pages = MAX_COLLECTION_PAGES, "Collections page cap reached, listing is incomplete");
        Ok(listing)
    }

    async fn fetch_collections_page(&self, url: &str) -> Result<CollectionsPage> {
        let response = self.client.get_json(url).await?;
        if !response.is_success() {
            return Err(Error::other(format!("{url} answered {}", response.status)));
        }
        CollectionsPage::deserialize(response.body.unwrap_or(Value::Null))
            .map_err(|e| Error::with_source(format!("{url} returned no collections list"), e))
    }

    async fn harvest_catalog(&self, catalog: &Catalog) -> Result<HarvestReport> {
        let listing = self.list_collections(catalog).await?;

        let listed: HashSet<String> = listing
            .documents
            .iter()
            .filter_map(|doc| doc.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        let mut report = HarvestReport {
            catalog_id: catalog.id,
            ..Default::default()
        };
        let mut retained: Vec<StacCollection> = Vec::new();

        for doc in &listing.documents {
            let id = doc.get("id").and_then(Value::as_str).unwrap_or("<unnamed>");

            let Some(link) = items_link(doc) else {
                tracing::debug!(collection = id, "Skipping collection without items link");
                report.skipped += 1;
                continue;
            };
            if !self.has_items(&link).await {
                tracing::debug!(collection = id, "Skipping empty or unreachable collection");
                report.skipped += 1;
                continue;
            }

            match StacCollection::from_value(doc)? {
                ParsedCollection::Valid(collection) => retained.push(collection),
                ParsedCollection::Skipped { id, reason } => {
                    tracing::warn!(collection = ?id, reason = %reason, url = %catalog.url, "Skipping collection");
                    report.skipped += 1;
                }
            }
        }

        if !listing.complete {
            tracing::warn!(catalog_id = catalog.id, listed = listed.len(), "Partial listing, no collections retired");
        }
        let retired = self.db.transaction(|tx| {
            for collection in &retained {
                CollectionStore::upsert(tx, catalog.id, collection)?;
            }
            if listing.complete {
                CollectionStore::retire_missing(tx, catalog.id, &listed)
            } else {
                Ok(Vec::new())
            }
        })?;

        report.indexed = retained.len();
        report.retired = retired;

        if listing.stac_version.is_some() {
            self.registry
                .set_stac_version(catalog.id, listing.stac_version.as_deref())?;
        }

        Ok(report)
    }

    /// True if the items link answers 2xx with at least one feature
    async fn has_items(&self, link: &str) -> bool {
        match self.client.get_json(link).await {
            Ok(response) => response.is_success() && response.array_len("features").unwrap_or(0) > 0,
            Err(e) => {
                tracing::debug!(link = %link, error = %e, "Items link unreachable");
                false
            }
        }
    }
}

/// Absolute URL of a followable `next` link, resolved against the current page
fn next_page_url(current: &str, links: &[Link]) -> Option<String> {
    let link = find_link(links, "next").filter(|link| link.is_get())?;
    let href = link.href.as_deref()?;
    Url::parse(current)
        .and_then(|base| base.join(href))
        .map(String::from)
        .ok()
}
