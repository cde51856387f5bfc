//! Provider adapters.
//!
//! One module per provider, each a tagged struct implementing the gateway's
//! `Handler` protocol. Registration happens explicitly from the composition
//! root via `register_all` (or individually, for deployments that run a
//! subset of the fleet).

pub mod bandwidth;
pub mod facebook;
pub mod telegram;
pub mod twilio;
pub mod whatsapp;

use std::sync::Arc;

use carrier_gateway::registry::{HandlerRegistry, RegistryError};

/// Register the full handler fleet.
pub fn register_all(registry: &mut HandlerRegistry) -> Result<(), RegistryError> {
    registry.register(Arc::new(bandwidth::BandwidthHandler))?;
    registry.register(Arc::new(twilio::TwilioHandler))?;
    registry.register(Arc::new(facebook::FacebookHandler))?;
    registry.register(Arc::new(telegram::TelegramHandler))?;
    registry.register(Arc::new(whatsapp::WhatsAppHandler))?;
    Ok(())
}
