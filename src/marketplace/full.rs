//! Full-runtime read client
//!
//! Token pages and balances go through the stateful client protocol (one
//! callback fan-out against the target project). Orders, fees, collections
//! and trait counts reuse the query-mode reads.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, instrument};

use super::address::sql_address;
use super::coerce::normalize_token_id;
use super::edge::{now_secs, EdgeMarketplaceClient, ORDER_LIMIT};
use super::errors::{DataResult, MarketplaceError, MarketplaceResult};
use super::normalize::{normalize_balances, normalize_tokens};
use super::queries::OrderFilter;
use super::types::*;
use super::verify::{ownership_space, retain_owned};
use super::{ClientMode, MarketplaceClient};
use crate::filter;
use crate::indexer::{
    AbortSignal, FanoutRequest, FanoutResult, IndexerClient, IndexerError, IndexerResult, Page, Pagination,
    ProducerContext, Produced, ProjectId, Row, TokenBalanceQuery, TokenQuery,
};

/// Page size used while draining balance pages
const BALANCE_PAGE: u32 = 100;

pub struct FullMarketplaceClient {
    sql: EdgeMarketplaceClient,
}

impl FullMarketplaceClient {
    pub fn new(sql: EdgeMarketplaceClient) -> Self {
        Self { sql }
    }

    /// Run one producer against one project and unwrap its single result
    async fn call_one<T, F>(&self, project: &ProjectId, producer: F) -> MarketplaceResult<T>
    where
        T: Send + 'static,
        F: Fn(ProducerContext) -> Produced<T> + Send + Sync + 'static,
    {
        let request = FanoutRequest::callback(vec![project.clone()], producer);
        let mut result = self.sql.aggregator().fetch(request, AbortSignal::never()).await;
        if let Some(failure) = result.errors.pop() {
            return Err(failure.error.into());
        }
        result
            .data
            .pop()
            .map(|d| d.data)
            .ok_or_else(|| {
                MarketplaceError::from(IndexerError::Protocol {
                    project: project.clone(),
                    message: "producer finished without a value".to_string(),
                })
            })
    }

    async fn token_page(&self, project: &ProjectId, query: TokenQuery) -> MarketplaceResult<Page<Row>> {
        self.call_one(project, move |ctx: ProducerContext| {
            let query = query.clone();
            Produced::once(async move { ctx.client.tokens(&query).await })
        })
        .await
    }

    /// Every balance row for the query, following cursors to the last page
    async fn balances(
        &self,
        project: &ProjectId,
        query: TokenBalanceQuery,
        max_pages: usize,
    ) -> MarketplaceResult<Vec<Row>> {
        self.call_one(project, move |ctx: ProducerContext| {
            let query = query.clone();
            Produced::once(async move { drain_balances(ctx.client.as_ref(), &ctx.project, query, max_pages).await })
        })
        .await
    }

    async fn verify(&self, project: &ProjectId, collection: &str, listings: Vec<Order>) -> MarketplaceResult<Vec<Order>> {
        if listings.is_empty() {
            return Ok(listings);
        }
        let (owners, token_ids) = ownership_space(&listings);
        // One row per (owner, token) at most, plus the terminating page
        let max_pages = (owners.len() * token_ids.len()).div_ceil(BALANCE_PAGE as usize) + 1;
        let query = TokenBalanceQuery {
            contract_addresses: vec![sql_address(collection)],
            account_addresses: owners.iter().map(|o| sql_address(o)).collect(),
            token_ids,
            pagination: Pagination {
                limit: BALANCE_PAGE,
                ..Pagination::default()
            },
        };
        let balances = normalize_balances(&self.balances(project, query, max_pages).await?);
        Ok(retain_owned(listings, &balances))
    }

    fn token_query(contract: &str, token_ids: &[String], limit: u32, cursor: Option<String>) -> TokenQuery {
        TokenQuery {
            contract_addresses: vec![sql_address(contract)],
            token_ids: token_ids.iter().map(|id| normalize_token_id(id)).collect(),
            pagination: Pagination {
                limit,
                cursor,
                ..Pagination::default()
            },
        }
    }
}

/// Follow balance cursors until the last page. An empty page ends the walk;
/// a repeated cursor or more than `max_pages` pages is a protocol error.
async fn drain_balances(
    client: &dyn IndexerClient,
    project: &ProjectId,
    mut query: TokenBalanceQuery,
    max_pages: usize,
) -> IndexerResult<Vec<Row>> {
    let mut rows = Vec::new();
    let mut seen = HashSet::new();

    for _ in 0..max_pages {
        let page = client.token_balances(&query).await?;
        let empty = page.items.is_empty();
        rows.extend(page.items);

        let Some(cursor) = page.next_cursor else {
            return Ok(rows);
        };
        if empty {
            debug!(project = %project, cursor = %cursor, "Empty balance page with a cursor, stopping");
            return Ok(rows);
        }
        if !seen.insert(cursor.clone()) {
            return Err(IndexerError::Protocol {
                project: project.clone(),
                message: format!("balance cursor '{cursor}' repeated"),
            });
        }
        query.pagination.cursor = Some(cursor);
    }

    Err(IndexerError::Protocol {
        project: project.clone(),
        message: format!("balances did not end within {max_pages} pages"),
    })
}

#[async_trait]
impl MarketplaceClient for FullMarketplaceClient {
    fn mode(&self) -> ClientMode {
        ClientMode::Full
    }

    async fn get_collection(&self, options: &CollectionOptions) -> DataResult<CollectionSummary> {
        self.sql.collection(options).await
    }

    #[instrument(skip_all, fields(collection = %options.contract_address, cursor = ?options.cursor))]
    async fn list_collection_tokens(&self, options: &TokenListOptions) -> DataResult<TokenPage> {
        let project = self.sql.project(&options.project);
        let limit = self.sql.page_size(options.limit);
        let query = Self::token_query(
            &options.contract_address,
            &options.token_ids,
            limit,
            options.cursor.clone(),
        );

        let page = match self.token_page(&project, query).await {
            Ok(page) => page,
            Err(e) => return DataResult::err(e),
        };

        // The protocol has no attribute filter; narrow the decoded page instead
        let decoded = normalize_tokens(&project, &page.items);
        let before = decoded.len();
        let tokens: Vec<NormalizedToken> = decoded
            .into_iter()
            .filter(|t| filter::matches(&options.attribute_filters, t.metadata.as_json()))
            .collect();

        debug!(project = %project, fetched = before, kept = tokens.len(), "Token page");
        DataResult::ok(TokenPage {
            tokens,
            next_cursor: page.next_cursor,
        })
    }

    async fn get_collection_orders(&self, options: &OrderOptions) -> DataResult<Vec<Order>> {
        self.sql.orders(options).await
    }

    #[instrument(skip_all, fields(collection = %options.collection, verify = options.verify_ownership))]
    async fn list_collection_listings(&self, options: &ListingOptions) -> DataResult<Vec<Order>> {
        let project = self.sql.project(&options.project);
        let listings = match self
            .sql
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
        let project = self.sql.project(&options.project);
        let query = Self::token_query(&options.collection, &[options.token_id.clone()], 1, None);
        let token = match self.token_page(&project, query).await {
            Ok(page) => normalize_tokens(&project, &page.items).into_iter().next(),
            Err(e) => return DataResult::err(e),
        };
        let Some(token) = token else {
            return DataResult::err(MarketplaceError::NotFound {
                what: format!("token {} of {}", options.token_id, options.collection),
            });
        };

        let filter = OrderFilter {
            collection: &options.collection,
            token_id: Some(&options.token_id),
            ..OrderFilter::default()
        };
        let orders = match self.sql.fetch_orders(&project, &filter, ORDER_LIMIT).await {
            Ok(orders) => orders,
            Err(e) => {
                return DataResult::partial(
                    TokenDetail {
                        token,
                        orders: Vec::new(),
                        listings: Vec::new(),
                    },
                    e,
                )
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
        self.sql.fees(options).await
    }

    async fn collection_traits(&self, options: &TraitOptions) -> DataResult<CollectionTraits> {
        self.sql.traits(options).await
    }

    async fn list_collections(&self, projects: &[ProjectId]) -> FanoutResult<Vec<CollectionSummary>> {
        self.sql.collections(projects).await
    }
}
