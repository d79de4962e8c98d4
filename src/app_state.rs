//! Process-wide wiring of the engine.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::collaborators::Collaborators;
use crate::collaborators::memory::MemoryBackends;
use crate::config::EngineConfig;
use crate::domain::EventBus;
use crate::error::EngineError;
use crate::service::ContestService;
use crate::store::ContestStore;

/// Shared application state handed to jobs and embedding code.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Contest service for all business logic.
    pub service: ContestService,
    /// Event bus for journal and in-process observers.
    pub event_bus: EventBus,
    /// Clock that defines "today".
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Builds the engine around the given collaborators and clock.
    #[must_use]
    pub fn new(config: &EngineConfig, collaborators: Collaborators, clock: Arc<dyn Clock>) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        let service = ContestService::new(
            Arc::new(ContestStore::new()),
            collaborators,
            Arc::clone(&clock),
            event_bus.clone(),
            config.settlement(),
        );
        Self {
            service,
            event_bus,
            clock,
        }
    }

    /// Builds a standalone engine over in-memory collaborators and the
    /// system clock in the configured time zone.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the configured UTC offset is
    /// out of range.
    pub fn standalone(config: &EngineConfig) -> Result<(Self, MemoryBackends), EngineError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.utc_offset()?));
        let backends = MemoryBackends::default();
        let state = Self::new(config, backends.collaborators(config.call_timeout()), clock);
        Ok((state, backends))
    }
}
