//! Short-URL mapping.
//!
//! # Responsibilities
//! - Store code ↔ target URL mappings in memory
//! - Resolve `{prefix}/{code}` request paths to the stored target

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::checkpoint::RouteResolver;
use crate::pipeline::context::{now_millis, RequestContext, RouteTarget};

const CODE_LEN: usize = 8;

/// Per-link checkpoint settings stored alongside a short URL.
///
/// Stored as given and returned by decode; the pipeline does not read them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortUrlOptions {
    pub auth: Option<Value>,
    pub trace: Option<Value>,
    pub quota: Option<Value>,
    #[serde(rename = "transformRequest")]
    pub transform_request: Option<Value>,
}

/// A stored short URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortUrlEntry {
    pub code: String,
    pub target_url: String,
    pub title: String,
    pub create_at: u64,
    #[serde(flatten)]
    pub options: ShortUrlOptions,
}

/// Concurrent in-memory short-URL store.
#[derive(Debug, Clone, Default)]
pub struct ShortUrlStore {
    by_code: Arc<DashMap<String, ShortUrlEntry>>,
    by_url: Arc<DashMap<String, String>>,
}

impl ShortUrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_code(&self, code: &str) -> Option<ShortUrlEntry> {
        self.by_code.get(code).map(|r| r.value().clone())
    }

    pub fn by_url(&self, url: &str) -> Option<ShortUrlEntry> {
        let code = self.by_url.get(url)?.value().clone();
        self.by_code(&code)
    }

    /// Return the existing mapping for `url`, or create one.
    ///
    /// `title` and `options` only apply to a new mapping.
    pub fn get_or_insert(&self, url: &str, title: &str, options: &ShortUrlOptions) -> ShortUrlEntry {
        loop {
            let mut created = None;
            // The url entry lock serializes concurrent inserts of the same url.
            let code = self
                .by_url
                .entry(url.to_string())
                .or_insert_with(|| {
                    let entry = ShortUrlEntry {
                        code: self.fresh_code(),
                        target_url: url.to_string(),
                        title: title.to_string(),
                        create_at: now_millis(),
                        options: options.clone(),
                    };
                    self.by_code.insert(entry.code.clone(), entry.clone());
                    tracing::info!(code = %entry.code, url = %url, "Short URL created");
                    let code = entry.code.clone();
                    created = Some(entry);
                    code
                })
                .value()
                .clone();

            if let Some(entry) = created {
                return entry;
            }
            if let Some(entry) = self.by_code(&code) {
                return entry;
            }
            // Removed between the two lookups; the url slot is free again.
        }
    }

    /// Remove the mapping for `url`. Returns the removed entry.
    pub fn remove_by_url(&self, url: &str) -> Option<ShortUrlEntry> {
        let (_, code) = self.by_url.remove(url)?;
        self.by_code.remove(&code).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    fn fresh_code(&self) -> String {
        loop {
            let code: String = Uuid::new_v4().simple().to_string()[..CODE_LEN].to_string();
            if !self.by_code.contains_key(&code) {
                return code;
            }
        }
    }
}

/// Resolves `{prefix}/{code}` paths through a [`ShortUrlStore`].
#[derive(Debug, Clone)]
pub struct ShortUrlResolver {
    prefix: String,
    store: ShortUrlStore,
}

impl ShortUrlResolver {
    pub fn new(prefix: impl Into<String>, store: ShortUrlStore) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            store,
        }
    }
}

#[async_trait]
impl RouteResolver for ShortUrlResolver {
    async fn resolve(&self, ctx: &RequestContext) -> Option<RouteTarget> {
        let rest = ctx.uri.path().strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix('/')?;
        let code = rest.split('/').next().filter(|c| !c.is_empty())?;

        let entry = self.store.by_code(code)?;
        match RouteTarget::parse(&entry.target_url) {
            Ok(target) => Some(target.with_strip_prefix(Some(format!("{}/{}", self.prefix, code)))),
            Err(e) => {
                tracing::warn!(code = %code, error = %e, "Stored short URL has an invalid target");
                None
            }
        }
    }
}
