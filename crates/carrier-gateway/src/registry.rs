//! Handler registry: channel-type code to adapter, fixed after startup.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use carrier_common::ChannelType;

use crate::handler::Handler;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler already registered for channel type {0}")]
    Duplicate(ChannelType),
}

/// Process-wide mapping from channel-type code to handler.
///
/// Populated by explicit `register` calls from the composition root and
/// read-only afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ChannelType, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its channel type. Registering the same code
    /// twice is a hard error.
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        let channel_type = handler.channel_type();
        if self.handlers.contains_key(&channel_type) {
            return Err(RegistryError::Duplicate(channel_type));
        }
        self.handlers.insert(channel_type, handler);
        Ok(())
    }

    pub fn get(&self, channel_type: &ChannelType) -> Option<Arc<dyn Handler>> {
        self.handlers.get(channel_type).cloned()
    }

    /// Lookup by the lowercase code used in URL paths.
    pub fn get_by_url_code(&self, code: &str) -> Option<Arc<dyn Handler>> {
        let channel_type = ChannelType::new(code).ok()?;
        self.get(&channel_type)
    }

    pub fn channel_types(&self) -> Vec<ChannelType> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
