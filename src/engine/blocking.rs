use super::{Engine, TransportKind};
use crate::attribute::{is_query_line, CachePolicy, Request};
use crate::batch::{Batch, Replies};
use crate::cache::{Cache, CacheState};
use crate::error::{PaceError, PaceResult};
use crate::transport::BlockingTransport;
use crate::value::AttrValue;
use parking_lot::Mutex;
use std::convert::Infallible;
use tracing::{debug, trace};

/// Engine over a blocking transport. Calls suspend the calling thread.
pub struct BlockingEngine {
    transport: Mutex<Box<dyn BlockingTransport>>,
    // never holds in-flight handles
    cache: Mutex<Cache<Infallible>>,
}

impl BlockingEngine {
    pub fn new(transport: impl BlockingTransport + 'static) -> Self {
        Self {
            transport: Mutex::new(Box::new(transport)),
            cache: Mutex::new(Cache::new()),
        }
    }

    /// One locked round trip. Lines holding a query read a reply.
    fn ask(&self, line: &str) -> PaceResult<String> {
        let mut transport = self.transport.lock();
        debug!(request = line, "REQ");
        let reply = if is_query_line(line) {
            transport.write_readline(line).map_err(PaceError::transport)?
        } else {
            transport.write(line).map_err(PaceError::transport)?;
            String::new()
        };
        let reply = reply.trim().to_string();
        debug!(reply = %reply, "REP");
        Ok(reply)
    }
}

impl Engine for BlockingEngine {
    const KIND: TransportKind = TransportKind::Blocking;

    type Reply<T: Send + 'static> = PaceResult<T>;

    fn execute<T: AttrValue>(&self, request: Request<T>) -> PaceResult<T> {
        match request.cache() {
            CachePolicy::Read(key) => {
                if let CacheState::Resolved(value) = self.cache.lock().state(key) {
                    trace!(key = key.as_str(), "cache hit");
                    return T::from_value(value);
                }
            }
            CachePolicy::Store(key) => {
                self.cache.lock().invalidate(key);
            }
            CachePolicy::None => {}
        }

        let reply = self.ask(request.text())?;
        let value = request.resolve(&reply)?;
        if let Some(key) = request.cache().key() {
            self.cache.lock().store(key, value.clone().into_value());
        }
        Ok(value)
    }

    fn fail<T: Send + 'static>(&self, error: PaceError) -> PaceResult<T> {
        Err(error)
    }

    fn flush(&self, batch: Batch) -> PaceResult<Replies> {
        let lines = batch.lines();
        debug!(requests = batch.len(), lines = lines.len(), "flushing batch");
        {
            let mut cache = self.cache.lock();
            for key in batch.invalidations() {
                cache.invalidate(&key);
            }
        }

        let mut replies = Vec::with_capacity(lines.len());
        for line in &lines {
            replies.push(self.ask(line)?);
        }

        let replies = batch.resolve(&replies)?;
        let mut cache = self.cache.lock();
        for (key, value) in replies.cache_updates() {
            cache.store(key, value.clone());
        }
        drop(cache);
        Ok(replies)
    }

    fn raw(&self, line: &str) -> PaceResult<String> {
        self.ask(line)
    }

    fn close(&self) -> PaceResult<()> {
        self.transport.lock().close().map_err(PaceError::transport)
    }

    fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}
