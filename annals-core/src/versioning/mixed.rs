use std::{collections::HashMap, sync::Arc};

use super::{VersioningError, VersioningStrategy};
use crate::{
    event::Event,
    typemap::{MappingError, NameAndVersion},
};

/// Composite strategy that routes each event name to a sub-strategy.
///
/// Lets one stream mix evolution policies per event type: simple
/// events stay unversioned while a frequently reshaped one gets
/// upcasting, for example. On read the stored name picks the
/// sub-strategy; on write the sub-strategies are consulted in the
/// order they were first routed and the first one that recognizes the
/// event's type wins.
pub struct Mixed<E> {
    routes: HashMap<String, Arc<dyn VersioningStrategy<E>>>,
    /// Every distinct sub-strategy, in first-routed order.
    strategies: Vec<Arc<dyn VersioningStrategy<E>>>,
}

impl<E: Event> Mixed<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            strategies: Vec::new(),
        }
    }

    /// Route all events stored under `name` to `strategy`.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::DuplicateRoute`] when the name is
    /// already routed.
    pub fn route(
        &mut self,
        name: impl Into<String>,
        strategy: Arc<dyn VersioningStrategy<E>>,
    ) -> Result<(), MappingError> {
        let name = name.into();
        if self.routes.contains_key(&name) {
            return Err(MappingError::DuplicateRoute { name });
        }
        if !self
            .strategies
            .iter()
            .any(|known| Arc::ptr_eq(known, &strategy))
        {
            self.strategies.push(Arc::clone(&strategy));
        }
        tracing::trace!(%name, "routed event name to versioning strategy");
        self.routes.insert(name, strategy);
        Ok(())
    }

    /// The first routed sub-strategy that recognizes this event's type.
    fn strategy_for(&self, event: &E) -> Result<&dyn VersioningStrategy<E>, VersioningError> {
        for strategy in &self.strategies {
            match strategy.name_and_version(event) {
                Ok(_) => return Ok(strategy.as_ref()),
                Err(VersioningError::Mapping(MappingError::TypeNotFound(_))) => {}
                Err(other) => return Err(other),
            }
        }
        Err(MappingError::TypeNotFound(event.type_tag().type_name()).into())
    }
}

impl<E: Event> Default for Mixed<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> VersioningStrategy<E> for Mixed<E> {
    fn to_event(
        &self,
        body: &serde_json::Value,
        name: &str,
        version: u16,
    ) -> Result<E, VersioningError> {
        let strategy = self.routes.get(name).ok_or_else(|| {
            MappingError::NameNotFound(NameAndVersion::new(name, version))
        })?;
        strategy.to_event(body, name, version)
    }

    fn name_and_version(&self, event: &E) -> Result<NameAndVersion, VersioningError> {
        self.strategy_for(event)?.name_and_version(event)
    }

    fn to_body(&self, event: &E) -> Result<serde_json::Value, VersioningError> {
        self.strategy_for(event)?.to_body(event)
    }
}
