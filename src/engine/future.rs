use super::{Engine, TransportKind};
use crate::attribute::{is_query_line, CachePolicy, Request};
use crate::batch::{Batch, Replies};
use crate::cache::{Cache, CacheState};
use crate::error::{PaceError, PaceResult};
use crate::transport::AsyncTransport;
use crate::value::{AttrValue, Value};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Handle to a request that has already been scheduled on the runtime.
pub type Pending<T> = BoxFuture<'static, PaceResult<T>>;

type SharedRead = Shared<Pending<Value>>;

struct Inner {
    transport: Mutex<Box<dyn AsyncTransport>>,
    cache: parking_lot::Mutex<Cache<SharedRead>>,
}

impl Inner {
    /// One locked round trip. Lines holding a query read a reply.
    async fn ask(&self, line: &str) -> PaceResult<String> {
        let mut transport = self.transport.lock().await;
        debug!(request = line, "REQ");
        let reply = if is_query_line(line) {
            transport
                .write_readline(line)
                .await
                .map_err(PaceError::transport)?
        } else {
            transport.write(line).await.map_err(PaceError::transport)?;
            String::new()
        };
        let reply = reply.trim().to_string();
        debug!(reply = %reply, "REP");
        Ok(reply)
    }

    async fn round_trip<T: 'static>(&self, request: Request<T>) -> PaceResult<T> {
        let reply = self.ask(request.text()).await?;
        request.resolve(&reply)
    }
}

/// Engine over a future-based transport.
///
/// Every call spawns its work on the tokio runtime immediately and returns
/// a [`Pending`] handle; callers decide when to await it. Must be used from
/// within a runtime.
///
/// Concurrent reads of a cacheable attribute share one in-flight request, so
/// a failure is seen by every waiter. Failed reads are evicted and retried
/// by the next caller.
#[derive(Clone)]
pub struct FutureEngine {
    inner: Arc<Inner>,
}

impl FutureEngine {
    pub fn new(transport: impl AsyncTransport + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: Mutex::new(Box::new(transport)),
                cache: parking_lot::Mutex::new(Cache::new()),
            }),
        }
    }

    fn spawn<T, F>(future: F) -> Pending<T>
    where
        T: Send + 'static,
        F: Future<Output = PaceResult<T>> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(error) => Err(PaceError::from(error)),
            }
        }
        .boxed()
    }

    fn cached_read<T: AttrValue>(&self, key: String, request: Request<T>) -> Pending<T> {
        let mut cache = self.inner.cache.lock();
        let shared = match cache.state(&key) {
            CacheState::Resolved(value) => {
                trace!(key = key.as_str(), "cache hit");
                let value = value.clone();
                return async move { T::from_value(&value) }.boxed();
            }
            CacheState::InFlight(shared) => {
                trace!(key = key.as_str(), "joining in-flight read");
                shared.clone()
            }
            CacheState::NotCached => {
                let inner = Arc::clone(&self.inner);
                let shared = async move { inner.round_trip(request.erase()).await }
                    .boxed()
                    .shared();
                let ticket = cache.begin(key.clone(), shared.clone());

                // drive the read to completion even if no caller polls it
                let driver = shared.clone();
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let outcome = driver.await;
                    inner.cache.lock().finish(&key, ticket, outcome.ok());
                });
                shared
            }
        };
        drop(cache);
        async move { shared.await.and_then(|value| T::from_value(&value)) }.boxed()
    }
}

impl Engine for FutureEngine {
    const KIND: TransportKind = TransportKind::Future;

    type Reply<T: Send + 'static> = Pending<T>;

    fn execute<T: AttrValue>(&self, request: Request<T>) -> Pending<T> {
        let inner = Arc::clone(&self.inner);
        match request.cache().clone() {
            CachePolicy::Read(key) => self.cached_read(key, request),
            CachePolicy::Store(key) => {
                inner.cache.lock().invalidate(&key);
                Self::spawn(async move {
                    let value = inner.round_trip(request).await?;
                    inner.cache.lock().store(key, value.clone().into_value());
                    Ok(value)
                })
            }
            CachePolicy::None => Self::spawn(async move { inner.round_trip(request).await }),
        }
    }

    fn fail<T: Send + 'static>(&self, error: PaceError) -> Pending<T> {
        async move { Err(error) }.boxed()
    }

    fn flush(&self, batch: Batch) -> Pending<Replies> {
        let inner = Arc::clone(&self.inner);
        Self::spawn(async move {
            let lines = batch.lines();
            debug!(requests = batch.len(), lines = lines.len(), "flushing batch");
            {
                let mut cache = inner.cache.lock();
                for key in batch.invalidations() {
                    cache.invalidate(&key);
                }
            }

            let mut replies = Vec::with_capacity(lines.len());
            for line in &lines {
                replies.push(inner.ask(line).await?);
            }

            let replies = batch.resolve(&replies)?;
            {
                let mut cache = inner.cache.lock();
                for (key, value) in replies.cache_updates() {
                    cache.store(key, value.clone());
                }
            }
            Ok(replies)
        })
    }

    fn raw(&self, line: &str) -> Pending<String> {
        let inner = Arc::clone(&self.inner);
        let line = line.to_string();
        Self::spawn(async move { inner.ask(&line).await })
    }

    fn close(&self) -> Pending<()> {
        let inner = Arc::clone(&self.inner);
        Self::spawn(async move {
            let mut transport = inner.transport.lock().await;
            transport.close().await.map_err(PaceError::transport)
        })
    }

    fn clear_cache(&self) {
        self.inner.cache.lock().clear();
    }
}
