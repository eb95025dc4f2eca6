//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the first matching route for a request
//! - Return the route's target or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical route counts)

use async_trait::async_trait;

use crate::checkpoint::RouteResolver;
use crate::config::RouteConfig;
use crate::pipeline::context::{InvalidTarget, RequestContext, RouteTarget};
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

#[derive(Debug)]
struct CompiledRoute {
    name: String,
    matcher: AndMatcher,
    target: RouteTarget,
}

/// Priority-ordered route table built from configuration.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    /// Compile routes, higher priority first. Ties keep config order.
    pub fn from_config(mut configs: Vec<RouteConfig>) -> Result<Self, InvalidTarget> {
        configs.sort_by(|a, b| b.priority.cmp(&a.priority));

        let routes = configs
            .into_iter()
            .map(|config| {
                let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
                if let Some(host) = &config.host {
                    matchers.push(Box::new(HostMatcher::new(host.clone())));
                }
                let strip = match &config.path_prefix {
                    Some(prefix) => {
                        matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
                        config.strip_prefix.then(|| prefix.clone())
                    }
                    None => None,
                };

                Ok(CompiledRoute {
                    target: RouteTarget::parse(&config.target)?.with_strip_prefix(strip),
                    matcher: AndMatcher::new(matchers),
                    name: config.name,
                })
            })
            .collect::<Result<Vec<_>, InvalidTarget>>()?;

        Ok(Self { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn lookup(&self, ctx: &RequestContext) -> Option<&CompiledRoute> {
        self.routes.iter().find(|r| r.matcher.matches(ctx))
    }
}

#[async_trait]
impl RouteResolver for RouteTable {
    async fn resolve(&self, ctx: &RequestContext) -> Option<RouteTarget> {
        let route = self.lookup(ctx)?;
        tracing::debug!(request_id = %ctx.id(), route = %route.name, target = %route.target, "Route matched");
        Some(route.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};

    fn route(name: &str, prefix: &str, target: &str, priority: u32) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            host: None,
            path_prefix: Some(prefix.into()),
            target: target.into(),
            strip_prefix: true,
            priority,
        }
    }

    fn request(uri: &str) -> RequestContext {
        RequestContext::accept(Method::GET, uri.parse().unwrap(), HeaderMap::new())
    }

    #[tokio::test]
    async fn test_priority_wins() {
        let table = RouteTable::from_config(vec![
            route("catch-all", "/", "http://127.0.0.1:1000", 0),
            route("api", "/api", "http://127.0.0.1:2000", 10),
        ])
        .unwrap();

        let target = table.resolve(&request("/api/users")).await.unwrap();
        assert_eq!(target.port, 2000);
        assert_eq!(target.strip_prefix.as_deref(), Some("/api"));

        let target = table.resolve(&request("/web")).await.unwrap();
        assert_eq!(target.port, 1000);
    }

    #[tokio::test]
    async fn test_no_match() {
        let table = RouteTable::from_config(vec![route("api", "/api", "http://127.0.0.1:2000", 0)])
            .unwrap();
        assert!(table.resolve(&request("/other")).await.is_none());
    }

    #[test]
    fn test_invalid_target_rejected() {
        assert!(RouteTable::from_config(vec![route("x", "/", "::", 0)]).is_err());
    }
}
