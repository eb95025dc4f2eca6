//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, headers)
//!     → ChainResolver
//!         → shorturl.rs ({prefix}/{code} lookup)
//!         → router.rs (route table lookup)
//!             → matcher.rs (evaluate match conditions)
//!     → Return: RouteTarget or no match
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Sort by priority
//!     → Compile matchers and parse targets
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod router;
pub mod shorturl;

use std::sync::Arc;

use async_trait::async_trait;

use crate::checkpoint::RouteResolver;
use crate::pipeline::context::{RequestContext, RouteTarget};

pub use router::RouteTable;
pub use shorturl::{ShortUrlEntry, ShortUrlOptions, ShortUrlResolver, ShortUrlStore};

/// Tries resolvers in order; the first target wins.
#[derive(Default)]
pub struct ChainResolver {
    resolvers: Vec<Arc<dyn RouteResolver>>,
}

impl ChainResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: Arc<dyn RouteResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }
}

#[async_trait]
impl RouteResolver for ChainResolver {
    async fn resolve(&self, ctx: &RequestContext) -> Option<RouteTarget> {
        for resolver in &self.resolvers {
            if let Some(target) = resolver.resolve(ctx).await {
                return Some(target);
            }
        }
        None
    }
}
