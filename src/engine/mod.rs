//! Execution engines.
//!
//! An [`Engine`] is the only path from a rendered request to the transport.
//! It serialises transport access, applies the result cache and decodes
//! replies. Two implementations share this contract:
//!
//! - [`BlockingEngine`] returns `PaceResult<T>` directly
//! - [`FutureEngine`] returns an already-spawned [`Pending<T>`] future
//!
//! A device picks its engine, and therefore its [`TransportKind`], once at
//! construction.

use crate::attribute::Request;
use crate::batch::{Batch, Replies};
use crate::error::PaceError;
use crate::value::AttrValue;

mod blocking;
mod future;

pub use blocking::BlockingEngine;
pub use future::{FutureEngine, Pending};

/// Nature of the transport behind an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Blocking,
    Future,
}

/// Uniform execution contract over blocking and future-based transports.
pub trait Engine: Send + Sync + 'static {
    const KIND: TransportKind;

    /// What every engine call returns: a value, or a handle resolving to one.
    type Reply<T: Send + 'static>;

    /// Issue a single request, honouring its cache policy.
    fn execute<T: AttrValue>(&self, request: Request<T>) -> Self::Reply<T>;

    /// Wrap a failure that happened before anything reached the wire.
    fn fail<T: Send + 'static>(&self, error: PaceError) -> Self::Reply<T>;

    /// Issue every line of a batch in order and demultiplex the replies.
    fn flush(&self, batch: Batch) -> Self::Reply<Replies>;

    /// Send an arbitrary line; queries return the trimmed reply, commands an
    /// empty string.
    fn raw(&self, line: &str) -> Self::Reply<String>;

    fn close(&self) -> Self::Reply<()>;

    /// Drop every cached read.
    fn clear_cache(&self);

    fn kind(&self) -> TransportKind {
        Self::KIND
    }
}
