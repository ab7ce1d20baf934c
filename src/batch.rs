//! Request batching.
//!
//! A [`Batch`] packs requests into as few `;`-joined command lines as fit
//! under a maximum line length, then demultiplexes the combined replies back
//! into one result per request, in submission order.

use crate::attribute::{split_reply, CachePolicy, Request, NACK};
use crate::error::{PaceError, PaceResult};
use crate::value::{AttrValue, Value};
use std::fmt;
use std::marker::PhantomData;

/// Default line ceiling for PACE controllers.
pub const DEFAULT_MAX_LINE: usize = 128;

/// Ticket for one request of a batch, redeemed against [`Replies`].
pub struct Slot<T> {
    index: usize,
    _type: PhantomData<fn() -> T>,
}

impl<T> Slot<T> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.index)
    }
}

struct Pending {
    label: String,
    // index of the line carrying this request
    line: usize,
    request: Request<Value>,
}

/// Accumulator of requests awaiting a single flush.
pub struct Batch {
    max_line: usize,
    lines: Vec<String>,
    current: String,
    pending: Vec<Pending>,
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("max_line", &self.max_line)
            .field("lines", &self.lines())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE)
    }
}

impl Batch {
    pub fn new(max_line: usize) -> Self {
        Self {
            max_line,
            lines: Vec::new(),
            current: String::new(),
            pending: Vec::new(),
        }
    }

    pub fn max_line(&self) -> usize {
        self.max_line
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Append a request and return the slot its result will occupy.
    pub fn push<T: AttrValue>(&mut self, request: Request<T>) -> Slot<T> {
        let label = request.text().to_string();
        self.push_labeled(label, request)
    }

    /// Append a request under a caller-chosen label (e.g. the attribute name).
    pub fn push_labeled<T: AttrValue>(&mut self, label: impl Into<String>, request: Request<T>) -> Slot<T> {
        self.pack(request.text());
        self.pending.push(Pending {
            label: label.into(),
            line: self.lines.len(),
            request: request.erase(),
        });
        Slot {
            index: self.pending.len() - 1,
            _type: PhantomData,
        }
    }

    fn pack(&mut self, text: &str) {
        if self.current.is_empty() {
            self.current.push_str(text);
        } else if self.current.len() + 1 + text.len() > self.max_line {
            let line = std::mem::replace(&mut self.current, text.to_string());
            self.lines.push(line);
        } else {
            self.current.push(';');
            self.current.push_str(text);
        }
    }

    /// Command lines in issue order. Empty for an empty batch.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = self.lines.clone();
        if !self.current.is_empty() {
            lines.push(self.current.clone());
        }
        lines
    }

    /// Keys the flush must invalidate before issuing its lines.
    pub fn invalidations(&self) -> Vec<String> {
        self.pending
            .iter()
            .filter_map(|p| match p.request.cache() {
                CachePolicy::Store(key) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    fn expected_fragments(&self) -> usize {
        self.pending.iter().map(|p| p.request.fragments()).sum()
    }

    /// Demultiplex the replies of every line, in order, into per-request
    /// results. `replies` holds one entry per line of [`Batch::lines`].
    ///
    /// Each line is walked sub-command by sub-command. Queries take one
    /// fragment each. A set takes a fragment only when the device rejected
    /// it, i.e. the line carries more fragments than its queries account for
    /// and the next one is `NACK`. A rejection fails only its own request.
    /// Any other count difference is a protocol desynchronisation and fails
    /// the whole batch.
    pub fn resolve<S: AsRef<str>>(self, replies: &[S]) -> PaceResult<Replies> {
        if replies.len() != self.lines().len() {
            return Err(PaceError::BatchReplyMismatch {
                expected: self.expected_fragments(),
                received: replies
                    .iter()
                    .map(|reply| split_reply(reply.as_ref()).len())
                    .sum(),
            });
        }

        let mut pending = self.pending.into_iter().peekable();
        let mut entries = Vec::new();
        for (line, reply) in replies.iter().enumerate() {
            let fragments = split_reply(reply.as_ref());
            let mut requests = Vec::new();
            while let Some(next) = pending.next_if(|p| p.line == line) {
                requests.push(next);
            }

            let expected: usize = requests.iter().map(|p| p.request.fragments()).sum();
            let mismatch = PaceError::BatchReplyMismatch {
                expected,
                received: fragments.len(),
            };
            if fragments.len() < expected {
                return Err(mismatch);
            }
            let mut surplus = fragments.len() - expected;
            let mut cursor = 0;
            for request in requests {
                let mut own = Vec::with_capacity(request.request.fragments());
                let mut rejected = false;
                for &query in request.request.parts() {
                    if query {
                        own.push(fragments[cursor]);
                        cursor += 1;
                    } else if surplus > 0 && fragments[cursor] == NACK {
                        rejected = true;
                        surplus -= 1;
                        cursor += 1;
                    }
                }
                let result = if rejected {
                    Err(PaceError::Nack {
                        request: request.request.text().to_string(),
                    })
                } else {
                    request.request.decode_fragments(&own)
                };
                entries.push(Entry {
                    label: request.label,
                    cache: request.request.cache().clone(),
                    result,
                });
            }
            if surplus > 0 {
                return Err(mismatch);
            }
        }
        Ok(Replies { entries })
    }
}

struct Entry {
    label: String,
    cache: CachePolicy,
    result: PaceResult<Value>,
}

/// Decoded results of a flushed batch, in submission order.
pub struct Replies {
    entries: Vec<Entry>,
}

impl fmt::Debug for Replies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.label, &e.result)))
            .finish()
    }
}

impl Replies {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Typed result for a slot handed out by [`Batch::push`].
    pub fn get<T: AttrValue>(&self, slot: Slot<T>) -> PaceResult<T> {
        let entry = self
            .entries
            .get(slot.index)
            .ok_or(PaceError::BatchReplyMismatch {
                expected: slot.index + 1,
                received: self.entries.len(),
            })?;
        match &entry.result {
            Ok(value) => T::from_value(value),
            Err(error) => Err(error.clone()),
        }
    }

    /// `(label, result)` pairs in submission order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PaceResult<Value>)> {
        self.entries.iter().map(|e| (e.label.as_str(), &e.result))
    }

    pub fn into_values(self) -> Vec<PaceResult<Value>> {
        self.entries.into_iter().map(|e| e.result).collect()
    }

    /// Successful results that belong in the read cache.
    pub(crate) fn cache_updates(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().filter_map(|e| match (e.cache.key(), &e.result) {
            (Some(key), Ok(value)) => Some((key, value)),
            _ => None,
        })
    }
}
