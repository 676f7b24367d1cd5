//! Path parameters and the buffer pool used while collecting them.
//!
//! A lookup collects parameters into a buffer lent by a [`ParamsPool`], then
//! moves them into a caller-owned [`Params`]. The emptied buffer keeps its
//! capacity and goes back to the pool, so steady-state routing does not
//! allocate a scratch vector per request.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// Capacity of a freshly created buffer. Four covers nearly every real route.
const BUFFER_CAPACITY: usize = 4;

/// Upper bound on idle buffers held by one pool.
const MAX_IDLE_BUFFERS: usize = 64;

/// A single named path parameter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Param {
    pub key: String,
    pub value: String,
}

impl Param {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Ordered path parameters produced by one lookup.
///
/// Order follows the path left to right, so `/users/:u/posts/:p` matched
/// against `/users/7/posts/9` yields `[u=7, p=9]`. Indexing by position is
/// therefore stable.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Params(Vec<Param>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Value of the first parameter named `key`, or `None` when the route
    /// declares no such parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, Param> { self.0.iter() }
    pub fn as_slice(&self) -> &[Param] { &self.0 }
}

impl From<Vec<Param>> for Params {
    fn from(params: Vec<Param>) -> Self {
        Self(params)
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Params {
    type Item = Param;
    type IntoIter = std::vec::IntoIter<Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// ── Pool ──────────────────────────────────────────────────────────────────────

/// Bounded free list of parameter buffers.
///
/// Lookups run concurrently on many threads, so the list sits behind a
/// `parking_lot::Mutex`. The lock is held only to pop or push one `Vec`,
/// never during tree traversal.
#[derive(Debug, Default)]
pub(crate) struct ParamsPool {
    free: Mutex<Vec<Vec<Param>>>,
}

impl ParamsPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Lend an empty buffer. It returns to the pool when the guard drops.
    pub(crate) fn acquire(&self) -> PooledBuffer<'_> {
        let buf = self.free.lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(BUFFER_CAPACITY));
        PooledBuffer { buf, pool: self }
    }

    fn release(&self, mut buf: Vec<Param>) {
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < MAX_IDLE_BUFFERS {
            free.push(buf);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

/// A buffer on loan from a [`ParamsPool`].
pub(crate) struct PooledBuffer<'p> {
    buf: Vec<Param>,
    pool: &'p ParamsPool,
}

impl PooledBuffer<'_> {
    /// Move the collected parameters into an owned [`Params`], leaving the
    /// buffer empty with its capacity intact.
    pub(crate) fn take(&mut self) -> Params {
        Params(self.buf.drain(..).collect())
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<Param>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
