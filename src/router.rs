//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. You register a path, you
//! get a handler back. That is all.
//!
//! Paths are split into `/`-separated segments. A segment starting with `:`
//! declares a named parameter (`/users/:id`); everything else is matched
//! literally. Empty segments are dropped, so `/a//b/` and `/a/b` are the same
//! route.
//!
//! # Matching rules
//!
//! At every node a literal child is tried before the parameter child. Once a
//! literal branch is taken the router never comes back to try the parameter
//! branch, even if the literal branch dead-ends deeper down:
//!
//! ```rust
//! use kese::Router;
//!
//! let mut router = Router::new();
//! router.add("GET", "/a/b", "literal");
//! router.add("GET", "/a/:x/c", "param");
//!
//! // `b` commits to the literal branch, which has no `c` below it.
//! assert!(router.lookup("GET", "/a/b/c").is_none());
//! assert_eq!(router.lookup("GET", "/a/z/c").map(|m| *m.handler), Some("param"));
//! ```
//!
//! # Concurrency
//!
//! [`Router::add`] takes `&mut self`; [`Router::lookup`] takes `&self`. Build
//! the router before serving, then share it (an `Arc<Router<_>>` is enough).
//! Lookups never touch the tree structure, so any number of threads can run
//! them at once.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::params::{Param, Params, ParamsPool};

/// Splits a path into its non-empty segments.
///
/// `"/"` yields nothing; `"//a//b//"` yields `["a", "b"]`. Registration and
/// lookup both go through this function, so they always agree on what a
/// path means.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// One path segment in a method tree.
struct Node<T> {
    /// Literal text, or `:name` on a parameter node. Kept for diagnostics.
    segment: String,
    static_children: HashMap<String, Node<T>>,
    param_child: Option<Box<Node<T>>>,
    /// Set only on parameter nodes.
    param_name: Option<String>,
    /// `Some` exactly when a route ends at this node.
    handler: Option<T>,
}

impl<T> Node<T> {
    fn literal(segment: &str) -> Self {
        Self {
            segment: segment.to_owned(),
            static_children: HashMap::new(),
            param_child: None,
            param_name: None,
            handler: None,
        }
    }

    fn param(segment: &str, name: &str) -> Self {
        Self {
            param_name: Some(name.to_owned()),
            ..Self::literal(segment)
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// A successful [`Router::lookup`].
#[derive(Debug)]
pub struct RouteMatch<'r, T> {
    pub handler: &'r T,
    /// Parameters in the order they appear in the path. Owned by the caller.
    pub params: Params,
}

/// Generic per-method segment tree.
///
/// `T` is whatever the caller wants back from a match. The framework stores
/// boxed async handlers; tests store plain strings.
pub struct Router<T> {
    trees: HashMap<String, Node<T>>,
    pool: ParamsPool,
}

impl<T> Router<T> {
    pub fn new() -> Self {
        Self { trees: HashMap::new(), pool: ParamsPool::new() }
    }

    /// Register `handler` for a method + path pair.
    ///
    /// Never fails. Malformed paths are normalized by [`split_path`] and
    /// registering the same route twice keeps the second handler. Only the
    /// exact path `/` registers the root; any other path with no segments
    /// (`""`, `//`) registers nothing.
    ///
    /// A node has at most one parameter child. If `/users/:id` is registered
    /// and then `/users/:name/posts`, the second route reuses the `id`
    /// binding and a warning is logged.
    pub fn add(&mut self, method: &str, path: &str, handler: T) {
        let mut current = self.trees
            .entry(method.to_owned())
            .or_insert_with(|| Node::literal("/"));

        let mut depth = 0;
        for segment in split_path(path) {
            depth += 1;
            current = match segment.strip_prefix(':') {
                Some(name) => {
                    let child = current.param_child
                        .get_or_insert_with(|| Box::new(Node::param(segment, name)));
                    if child.param_name.as_deref() != Some(name) {
                        warn!(
                            method,
                            path,
                            existing = %child.segment,
                            ignored = segment,
                            "conflicting parameter name at the same position, keeping the existing one",
                        );
                    }
                    &mut **child
                }
                None => current.static_children
                    .entry(segment.to_owned())
                    .or_insert_with(|| Node::literal(segment)),
            };
        }

        if depth == 0 && path != "/" {
            warn!(method, path, "path has no segments, route not registered");
            return;
        }

        if current.handler.replace(handler).is_some() {
            debug!(method, path, "route re-registered, previous handler replaced");
        } else {
            debug!(method, path, "route registered");
        }
    }

    /// Find the handler for a method + path pair and extract its parameters.
    ///
    /// Returns `None` when the method has no routes, a segment matches
    /// neither a literal nor a parameter child, or the path ends on a node
    /// that no route terminates at. Literal children win over the parameter
    /// child and there is no backtracking.
    pub fn lookup(&self, method: &str, path: &str) -> Option<RouteMatch<'_, T>> {
        let mut current = self.trees.get(method)?;
        let mut buf = self.pool.acquire();

        for segment in split_path(path) {
            if let Some(child) = current.static_children.get(segment) {
                current = child;
                continue;
            }

            let child = current.param_child.as_deref()?;
            buf.push(Param::new(child.param_name.as_deref().unwrap_or_default(), segment));
            current = child;
        }

        let handler = current.handler.as_ref()?;
        Some(RouteMatch { handler, params: buf.take() })
    }

    /// Methods that have at least one registered route.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.trees.keys().map(String::as_str)
    }
}

impl<T> Default for Router<T> {
    fn default() -> Self { Self::new() }
}

impl<T> fmt::Debug for Router<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.trees.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
