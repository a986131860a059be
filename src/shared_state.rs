use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::engine::GraphQLEngine;
use crate::listeners::{ListenerSet, RequestListener};

/// State shared by every request handler: the injected engine, the fixed
/// listener set and the loaded configuration.
pub struct GatewaySharedState {
    pub config: Arc<GatewayConfig>,
    pub engine: Arc<dyn GraphQLEngine>,
    pub listeners: ListenerSet,
}

impl GatewaySharedState {
    pub fn new(
        config: GatewayConfig,
        engine: Arc<dyn GraphQLEngine>,
        listeners: Vec<Arc<dyn RequestListener>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            engine,
            listeners: ListenerSet::new(listeners),
        })
    }
}
