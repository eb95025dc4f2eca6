//! Per-client target override.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::checkpoint::{CapabilityError, TransformResult, Transformer};
use crate::config::TransformConfig;
use crate::pipeline::context::{InvalidTarget, RequestContext, RouteTarget};

/// Sends selected clients to a dedicated backend.
#[derive(Debug, Default)]
pub struct ClientTargetTransformer {
    overrides: HashMap<String, RouteTarget>,
}

impl ClientTargetTransformer {
    pub fn new(config: &TransformConfig) -> Result<Self, InvalidTarget> {
        let overrides = config
            .client_targets
            .iter()
            .map(|(client, url)| Ok((client.clone(), RouteTarget::parse(url)?)))
            .collect::<Result<_, InvalidTarget>>()?;
        Ok(Self { overrides })
    }
}

#[async_trait]
impl Transformer for ClientTargetTransformer {
    async fn check(
        &self,
        principal: Option<&str>,
        _ctx: &RequestContext,
        target: &RouteTarget,
    ) -> Result<TransformResult, CapabilityError> {
        let replacement = principal
            .and_then(|client| self.overrides.get(client))
            .map(|t| t.clone().with_strip_prefix(target.strip_prefix.clone()));
        Ok(TransformResult {
            target: replacement,
        })
    }
}
