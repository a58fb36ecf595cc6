//! Query execution: cache lookup, fetching, background refresh and
//! invalidation.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use anyhow::Context;
use crmdesk_query::{
    compile, compile_insert, compile_update, DependencyTag, Method, Query, RequestDescriptor,
    ResponseShape,
};
use crmdesk_schema::{Collection, Entity};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tap::TapFallible;
use tokio::{
    runtime::Handle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, instrument, warn};

use crate::{
    cache::{CacheEntry, CacheStore, EntryState},
    config::ClientConfig,
    http::{
        send_with_retry, ConcurrencyLimiter, FixtureTransport, HttpRequest, ReqwestTransport,
        Transport,
    },
    QueryError, QueryResult, SubscriptionValue,
};

/// One page of a list read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Value>,
    /// Absolute link to the next page, if the server paged the result.
    pub next_link: Option<String>,
    pub count: Option<u64>,
}

#[derive(Deserialize)]
struct ODataEnvelope {
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.count")]
    count: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody {
    Bare(Vec<Value>),
    Envelope(ODataEnvelope),
}

fn parse_page(body: &str) -> QueryResult<Page> {
    Ok(match serde_json::from_str::<ListBody>(body)? {
        ListBody::Bare(items) => Page {
            items,
            next_link: None,
            count: None,
        },
        ListBody::Envelope(envelope) => Page {
            items: envelope.value,
            next_link: envelope.next_link,
            count: envelope.count,
        },
    })
}

/// Turn a response body into the value cached for `shape`.
fn decode_body(shape: ResponseShape, body: &str) -> QueryResult<Value> {
    match shape {
        ResponseShape::List => Ok(Value::Array(parse_page(body)?.items)),
        ResponseShape::Single => Ok(serde_json::from_str(body)?),
        ResponseShape::Raw => Ok(Value::String(body.to_string())),
    }
}

/// Mutations may answer `204 No Content` or echo the record.
fn decode_mutation(body: &str) -> QueryResult<Option<Value>> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(body)?))
}

fn current_runtime() -> QueryResult<Handle> {
    Handle::try_current().map_err(|_| QueryError::NoRuntime)
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    store: Arc<CacheStore>,
    limiter: ConcurrencyLimiter,
}

/// Executes queries against the CRM and keeps their results cached and
/// fresh. Cloning is cheap; clones share the cache.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("base_url", &self.inner.config.base_url.as_str())
            .field("transport", &self.inner.transport)
            .field("entries", &self.inner.store.len())
            .finish()
    }
}

impl QueryClient {
    /// Client with the transport `config` asks for: fixture files when a
    /// fixture directory is set, HTTPS otherwise.
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let transport: Arc<dyn Transport> = match &config.fixtures {
            Some(dir) => Arc::new(FixtureTransport::from_dir(dir)?),
            None => Arc::new(
                ReqwestTransport::new(
                    config.base_url.clone(),
                    config.token.clone(),
                    config.timeout,
                )
                .context("failed to build http client")?,
            ),
        };
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_store(config, transport, Arc::new(CacheStore::new()))
    }

    /// Client using an existing cache store.
    pub fn with_store(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<CacheStore>,
    ) -> Self {
        let limiter = match &config.concurrency {
            Some(limits) => ConcurrencyLimiter::for_host(&config.host_key(), limits),
            None => ConcurrencyLimiter::unlimited(),
        };
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                store,
                limiter,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    /// Typed query on `E` executed by this client.
    pub fn query<E: Entity>(&self) -> Query<E, QueryClient> {
        Query::<E>::new().with_client(self.clone())
    }

    /// Typed query on the `collection` of record `parent_id`.
    pub fn children<From: Entity, To: Entity>(
        &self,
        parent_id: impl Into<String>,
        collection: Collection<From, To>,
    ) -> Query<To, QueryClient> {
        Query::children_of(parent_id, collection).with_client(self.clone())
    }

    async fn send(&self, request: &HttpRequest) -> QueryResult<crate::http::HttpResponse> {
        send_with_retry(
            self.inner.transport.as_ref(),
            &self.inner.limiter,
            &self.inner.config.retry,
            request,
        )
        .await
    }

    /// Observable value of `descriptor`.
    ///
    /// Returns the live cache entry's value if one exists. Otherwise creates
    /// the entry, seeded with `previous` when given, and starts fetching.
    /// Concurrent callers for the same query share one entry and one fetch.
    #[instrument(
        name = "crmdesk.query.get",
        skip(self, descriptor, previous),
        fields(endpoint = %descriptor.endpoint()),
        err
    )]
    pub fn get(
        &self,
        descriptor: &RequestDescriptor,
        previous: Option<Value>,
    ) -> QueryResult<SubscriptionValue<Value>> {
        let runtime = current_runtime()?;
        let request = compile(descriptor);
        let key = request.key();

        let (entry, value, created) = self.inner.store.get_or_insert_with(&key, || {
            let refresh = descriptor.policy().refresh.unwrap_or_else(|| {
                self.inner
                    .config
                    .cache_duration(descriptor.cache_table_key())
            });
            CacheEntry::new(
                request,
                descriptor.shape(),
                descriptor.dependency_tags(),
                refresh,
                descriptor.policy().cacheable.clone(),
                previous,
            )
        });

        let generation = if created {
            Some(entry.begin_fetch())
        } else {
            entry.begin_fetch_if_unloaded()
        };
        if let Some(generation) = generation {
            self.spawn_fetch(&runtime, entry.clone(), generation);
        }
        if created {
            self.spawn_refresh(&runtime, &entry);
        }
        Ok(value)
    }

    fn spawn_fetch(&self, runtime: &Handle, entry: Arc<CacheEntry>, generation: u64) {
        let client = self.clone();
        runtime.spawn(async move { client.run_fetch(&entry, generation).await });
    }

    async fn run_fetch(&self, entry: &Arc<CacheEntry>, generation: u64) {
        let request = HttpRequest::get(entry.request().path_and_query());
        let result = self
            .send(&request)
            .await
            .and_then(|res| decode_body(entry.shape(), &res.body));

        match result {
            Ok(value) => {
                let cacheable = entry.accepts(&value);
                let published = entry.finish_fetch(generation, Some(value));
                if published && !cacheable {
                    debug!("{}: value not cacheable, dropping entry", entry.key());
                    self.inner.store.remove_entry(entry);
                }
            }
            Err(e) => {
                entry.finish_fetch(generation, None);
                warn!("fetch of {} failed, keeping last value: {}", entry.key(), e);
            }
        }
    }

    /// Refetch `entry` every interval while it is observed; drop it from the
    /// store on the first tick nobody is.
    fn spawn_refresh(&self, runtime: &Handle, entry: &Arc<CacheEntry>) {
        let period = entry.refresh_interval();
        if period.is_zero() {
            return;
        }

        let client: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let weak_entry = Arc::downgrade(entry);
        let task = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let (Some(inner), Some(entry)) = (client.upgrade(), weak_entry.upgrade()) else {
                    break;
                };
                if entry.state() == EntryState::Evicted {
                    break;
                }
                if entry.is_idle() && inner.store.evict_if_idle(&entry) {
                    break;
                }

                let generation = entry.begin_fetch();
                QueryClient { inner }.run_fetch(&entry, generation).await;
            }
        });
        entry.set_refresh_task(task);
    }

    /// Refetch every cached entry tagged `tag` now, whether or not it is
    /// observed. Returns how many entries were refreshed.
    #[instrument(name = "crmdesk.query.invalidate", skip(self, tag), err)]
    pub fn invalidate(&self, tag: impl Into<DependencyTag>) -> QueryResult<usize> {
        let runtime = current_runtime()?;
        let tag = tag.into();
        let entries = self.inner.store.tagged(&tag);
        for entry in &entries {
            let generation = entry.begin_fetch();
            self.spawn_fetch(&runtime, entry.clone(), generation);
        }
        debug!("invalidated {} entries tagged {}", entries.len(), tag);
        Ok(entries.len())
    }

    /// Like [`invalidate`](Self::invalidate) but waits for the refetches.
    pub async fn invalidate_and_wait(&self, tag: impl Into<DependencyTag>) -> usize {
        let tag = tag.into();
        let entries = self.inner.store.tagged(&tag);
        join_all(entries.iter().map(|entry| {
            let generation = entry.begin_fetch();
            self.run_fetch(entry, generation)
        }))
        .await;
        debug!("refreshed {} entries tagged {}", entries.len(), tag);
        entries.len()
    }

    /// Read `descriptor` once, bypassing the cache.
    #[instrument(
        name = "crmdesk.query.fetch_once",
        skip(self, descriptor),
        fields(endpoint = %descriptor.endpoint()),
        err
    )]
    pub async fn fetch_once(&self, descriptor: &RequestDescriptor) -> QueryResult<Value> {
        let request = HttpRequest::get(compile(descriptor).path_and_query());
        let res = self.send(&request).await?;
        decode_body(descriptor.shape(), &res.body)
    }

    /// First page of a list read, bypassing the cache.
    pub async fn fetch_page(&self, descriptor: &RequestDescriptor) -> QueryResult<Page> {
        let request = HttpRequest::get(compile(descriptor).path_and_query());
        let res = self.send(&request).await?;
        parse_page(&res.body)
    }

    /// Follow an `@odata.nextLink`.
    #[instrument(name = "crmdesk.query.next_page", skip(self), err)]
    pub async fn next_page(&self, link: &str) -> QueryResult<Page> {
        let base = self.inner.config.base_url.as_str();
        let target = link
            .strip_prefix(base)
            .or_else(|| link.strip_prefix(base.trim_end_matches('/')))
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(link);

        let res = self.send(&HttpRequest::get(target)).await?;
        parse_page(&res.body)
    }

    /// `POST <endpoint>` with `body`. The cache is not touched; invalidate
    /// the affected tags afterwards.
    #[instrument(name = "crmdesk.query.insert", skip(self, body), err)]
    pub async fn insert(&self, endpoint: &str, body: Value) -> QueryResult<Option<Value>> {
        let request = compile_insert(endpoint);
        let res = self
            .send(&HttpRequest::with_body(
                Method::Post,
                request.path_and_query(),
                body,
            ))
            .await
            .tap_err(|e| error!("insert into {} failed: {}", endpoint, e))?;
        decode_mutation(&res.body)
    }

    /// `PATCH <endpoint>(<id>)` with the changed fields in `body`.
    #[pseudonym::alias(upsert)]
    pub async fn update(&self, endpoint: &str, id: &str, body: Value) -> QueryResult<Option<Value>> {
        let request = compile_update(endpoint, id);
        debug!("updating {}", request);
        let res = self
            .send(&HttpRequest::with_body(
                Method::Patch,
                request.path_and_query(),
                body,
            ))
            .await
            .tap_err(|e| error!("update of {}({}) failed: {}", endpoint, id, e))?;
        decode_mutation(&res.body)
    }
}
