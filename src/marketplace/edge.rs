//! Query-mode read client
//!
//! Every read is one or two `POST /sql` round trips against the target
//! project, retried under the aggregator's policy.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument, warn};

use super::address::checksum_or_raw;
use super::coerce::{as_number, as_string};
use super::errors::{DataResult, MarketplaceError, MarketplaceResult};
use super::normalize::{normalize_balances, normalize_collections, normalize_orders, normalize_tokens};
use super::queries::{
    balances_query, collection_query, collections_query, decode_cursor, encode_cursor, fees_query, orders_query,
    tokens_query, OrderFilter,
};
use super::types::*;
use super::verify::{ownership_space, retain_owned};
use super::{ClientMode, ClientSettings, MarketplaceClient};
use crate::filter::{self, available_filters, trait_counts_query, ActiveFilterSet, TraitCounts, TraitMetadataRow};
use crate::indexer::{AbortSignal, Aggregator, EndpointError, FanoutRequest, FanoutResult, ProjectId, Row};

/// Upper bound on orders pulled for one collection or token
pub(crate) const ORDER_LIMIT: u32 = 1_000;
const COLLECTION_LIMIT: u32 = 500;

pub(crate) fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

#[derive(Clone)]
pub struct EdgeMarketplaceClient {
    aggregator: Aggregator,
    settings: ClientSettings,
}

impl EdgeMarketplaceClient {
    pub fn new(aggregator: Aggregator, settings: ClientSettings) -> Self {
        Self { aggregator, settings }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub(crate) fn project(&self, requested: &Option<ProjectId>) -> ProjectId {
        requested.clone().unwrap_or_else(|| self.settings.default_project.clone())
    }

    pub(crate) fn page_size(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.settings.default_page_size).max(1)
    }

    async fn rows(&self, project: &ProjectId, sql: &str) -> MarketplaceResult<Vec<Row>> {
        let rows = self
            .aggregator
            .sql()
            .query_until(project, sql, self.aggregator.retry_policy(), &AbortSignal::never())
            .await?;
        Ok(rows)
    }

    pub(crate) async fn fetch_orders(
        &self,
        project: &ProjectId,
        filter: &OrderFilter<'_>,
        limit: u32,
    ) -> MarketplaceResult<Vec<Order>> {
        let sql = orders_query(&self.settings.orders_table, filter, limit);
        Ok(normalize_orders(&self.rows(project, &sql).await?))
    }

    /// Sell + Placed orders that have not expired, before any ownership check
    pub(crate) async fn fetch_open_listings(
        &self,
        project: &ProjectId,
        collection: &str,
        token_id: Option<&str>,
        limit: u32,
    ) -> MarketplaceResult<Vec<Order>> {
        let now = now_secs();
        let filter = OrderFilter {
            collection,
            token_id,
            status: Some(OrderStatus::Placed),
            category: Some(OrderCategory::Sell),
            unexpired_at: Some(now),
            ..OrderFilter::default()
        };
        let orders = self.fetch_orders(project, &filter, limit).await?;
        Ok(orders.into_iter().filter(|o| o.is_listing(now)).collect())
    }

    async fn verify(&self, project: &ProjectId, collection: &str, listings: Vec<Order>) -> MarketplaceResult<Vec<Order>> {
        if listings.is_empty() {
            return Ok(listings);
        }
        let (owners, token_ids) = ownership_space(&listings);
        let sql = balances_query(collection, &owners, &token_ids);
        let balances = normalize_balances(&self.rows(project, &sql).await?);
        Ok(retain_owned(listings, &balances))
    }

    async fn fetch_token(&self, project: &ProjectId, collection: &str, token_id: &str) -> MarketplaceResult<NormalizedToken> {
        let sql = tokens_query(collection, &[token_id.to_string()], &ActiveFilterSet::new(), 1, 0);
        normalize_tokens(project, &self.rows(project, &sql).await?)
            .into_iter()
            .next()
            .ok_or_else(|| MarketplaceError::NotFound {
                what: format!("token {token_id} of {collection}"),
            })
    }

    async fn trait_pages(
        &self,
        projects: Vec<ProjectId>,
        collection: &str,
        filters: &ActiveFilterSet,
    ) -> FanoutResult<Vec<TraitMetadataRow>> {
        let sql = trait_counts_query(&super::address::sql_address(collection), filters);
        let request = FanoutRequest::query_with(projects, sql, |rows| Ok(TraitMetadataRow::from_rows(&rows)));
        self.aggregator.fetch(request, AbortSignal::never()).await
    }

    pub(crate) async fn traits(&self, options: &TraitOptions) -> DataResult<CollectionTraits> {
        let projects = if options.projects.is_empty() {
            self.aggregator.sql().registry().projects()
        } else {
            options.projects.clone()
        };

        let full = self.trait_pages(projects.clone(), &options.collection, &ActiveFilterSet::new()).await;
        if !full.any_succeeded() {
            return match full.errors.into_iter().next() {
                Some(first) => DataResult::err(first.error),
                None => DataResult::ok(CollectionTraits {
                    counts: TraitCounts::new(),
                    available_filters: Vec::new(),
                    failed: Vec::new(),
                }),
            };
        }

        let mut failed: Vec<EndpointError> = full.errors.clone();
        let counts = TraitCounts::aggregate(full.values().map(Vec::as_slice));

        let filtered = if options.filters.is_empty() {
            None
        } else {
            let filtered = self.trait_pages(projects, &options.collection, &options.filters).await;
            failed.extend(filtered.errors.iter().cloned());
            Some(TraitCounts::aggregate(filtered.values().map(Vec::as_slice)))
        };

        let available = available_filters(&counts, filtered.as_ref(), &options.filters);
        DataResult::ok(CollectionTraits {
            counts,
            available_filters: available,
            failed,
        })
    }

    pub(crate) async fn collections(&self, projects: &[ProjectId]) -> FanoutResult<Vec<CollectionSummary>> {
        let request = FanoutRequest::query(projects.to_vec(), collections_query(COLLECTION_LIMIT));
        self.aggregator
            .fetch(request, AbortSignal::never())
            .await
            .map(|project, rows| normalize_collections(project, &rows))
    }

    pub(crate) async fn collection(&self, options: &CollectionOptions) -> DataResult<CollectionSummary> {
        let project = self.project(&options.project);
        let sql = collection_query(&options.contract_address);
        match self.rows(&project, &sql).await {
            Ok(rows) => match normalize_collections(&project, &rows).into_iter().next() {
                Some(summary) => DataResult::ok(summary),
                None => DataResult::err(MarketplaceError::NotFound {
                    what: format!("collection {}", options.contract_address),
                }),
            },
            Err(e) => DataResult::err(e),
        }
    }

    pub(crate) async fn orders(&self, options: &OrderOptions) -> DataResult<Vec<Order>> {
        let project = self.project(&options.project);
        let filter = OrderFilter {
            collection: &options.collection,
            token_id: options.token_id.as_deref(),
            order_ids: &options.order_ids,
            status: options.status,
            category: options.category,
            unexpired_at: None,
        };
        self.fetch_orders(&project, &filter, options.limit.unwrap_or(ORDER_LIMIT))
            .await
            .into()
    }

    pub(crate) async fn fees(&self, options: &FeeOptions) -> DataResult<Fees> {
        let project = self.project(&options.project);
        let rows = match self.rows(&project, &fees_query(&self.settings.books_table)).await {
            Ok(rows) => rows,
            Err(e) => return DataResult::err(e),
        };
        match rows.first() {
            Some(row) => DataResult::ok(Fees {
                fee_num: as_number(row.get("fee_num")),
                fee_receiver: checksum_or_raw(&as_string(row.get("fee_receiver"))),
                fee_denominator: FEE_DENOMINATOR,
            }),
            None => DataResult::err(MarketplaceError::NotFound {
                what: "marketplace fee book".to_string(),
            }),
        }
    }
}

#[async_trait]
impl MarketplaceClient for EdgeMarketplaceClient {
    fn mode(&self) -> ClientMode {
        ClientMode::Edge
    }

    #[instrument(skip_all, fields(collection = %options.contract_address))]
    async fn get_collection(&self, options: &CollectionOptions) -> DataResult<CollectionSummary> {
        self.collection(options).await
    }

    #[instrument(skip_all, fields(collection = %options.contract_address, cursor = ?options.cursor))]
    async fn list_collection_tokens(&self, options: &TokenListOptions) -> DataResult<TokenPage> {
        let project = self.project(&options.project);
        let offset = match options.cursor.as_deref().map(decode_cursor).transpose() {
            Ok(offset) => offset.unwrap_or(0),
            Err(e) => return DataResult::err(e),
        };
        let limit = self.page_size(options.limit);

        let sql = tokens_query(
            &options.contract_address,
            &options.token_ids,
            &options.attribute_filters,
            limit,
            offset,
        );
        let mut rows = match self.rows(&project, &sql).await {
            Ok(rows) => rows,
            Err(e) => return DataResult::err(e),
        };

        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);
        let tokens: Vec<NormalizedToken> = normalize_tokens(&project, &rows)
            .into_iter()
            .filter(|t| filter::matches(&options.attribute_filters, t.metadata.as_json()))
            .collect();

        debug!(project = %project, rows = rows.len(), tokens = tokens.len(), has_more = has_more, "Token page");
        DataResult::ok(TokenPage {
            tokens,
            next_cursor: has_more.then(|| encode_cursor(offset + u64::from(limit))),
        })
    }

    #[instrument(skip_all, fields(collection = %options.collection))]
    async fn get_collection_orders(&self, options: &OrderOptions) -> DataResult<Vec<Order>> {
        self.orders(options).await
    }

    #[instrument(skip_all, fields(collection = %options.collection, verify = options.verify_ownership))]
    async fn list_collection_listings(&self, options: &ListingOptions) -> DataResult<Vec<Order>> {
        let project = self.project(&options.project);
        let listings = match self
            .fetch_open_listings(
                &project,
                &options.collection,
                options.token_id.as_deref(),
                options.limit.unwrap_or(ORDER_LIMIT),
            )
            .await
        {
            Ok(listings) => listings,
            Err(e) => return DataResult::err(e),
        };
        if !options.verify_ownership {
            return DataResult::ok(listings);
        }
        self.verify(&project, &options.collection, listings).await.into()
    }

    #[instrument(skip_all, fields(collection = %options.collection, token_id = %options.token_id))]
    async fn get_token(&self, options: &TokenDetailOptions) -> DataResult<TokenDetail> {
        let project = self.project(&options.project);
        let token = match self.fetch_token(&project, &options.collection, &options.token_id).await {
            Ok(token) => token,
            Err(e) => return DataResult::err(e),
        };

        let filter = OrderFilter {
            collection: &options.collection,
            token_id: Some(&options.token_id),
            ..OrderFilter::default()
        };
        let orders = match self.fetch_orders(&project, &filter, ORDER_LIMIT).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(project = %project, error = %e, "Token orders unavailable");
                return DataResult::partial(
                    TokenDetail {
                        token,
                        orders: Vec::new(),
                        listings: Vec::new(),
                    },
                    e,
                );
            }
        };

        let now = now_secs();
        let open: Vec<Order> = orders.iter().filter(|o| o.is_listing(now)).cloned().collect();
        let listings = if options.verify_ownership {
            self.verify(&project, &options.collection, open).await
        } else {
            Ok(open)
        };

        match listings {
            Ok(listings) => DataResult::ok(TokenDetail { token, orders, listings }),
            Err(e) => DataResult::partial(
                TokenDetail {
                    token,
                    orders,
                    listings: Vec::new(),
                },
                e,
            ),
        }
    }

    async fn get_fees(&self, options: &FeeOptions) -> DataResult<Fees> {
        self.fees(options).await
    }

    #[instrument(skip_all, fields(collection = %options.collection))]
    async fn collection_traits(&self, options: &TraitOptions) -> DataResult<CollectionTraits> {
        self.traits(options).await
    }

    async fn list_collections(&self, projects: &[ProjectId]) -> FanoutResult<Vec<CollectionSummary>> {
        self.collections(projects).await
    }
}
