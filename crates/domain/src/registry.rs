//! Start-up registry of aggregate kinds.
//!
//! Every aggregate kind is registered explicitly with two things: its
//! [`EventApplier`] and a zero-value factory. The factory is the only way
//! replay builds an instance, so it never goes through command validation
//! and can reach states (e.g. an aggregate born from a migration event)
//! that normal creation would reject.
//!
//! [`AggregateRegistry::ensure_ready`] is meant to run once during process
//! start-up; it verifies every kind has a factory and total dispatch over
//! its declared event kinds.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::aggregate::Aggregate;
use crate::applier::EventApplier;
use crate::error::{AggregateError, RegistryError};

/// Builds a zero-state aggregate without any domain validation.
pub type ZeroFn<A> = fn() -> A;

/// Registration data for one aggregate kind.
pub struct KindRegistration<A: Aggregate> {
    applier: Arc<EventApplier<A>>,
    factory: Option<ZeroFn<A>>,
}

impl<A: Aggregate> KindRegistration<A> {
    pub fn new(applier: EventApplier<A>) -> Self {
        Self {
            applier: Arc::new(applier),
            factory: None,
        }
    }

    pub fn with_factory(mut self, factory: ZeroFn<A>) -> Self {
        self.factory = Some(factory);
        self
    }
}

trait RegisteredKind: Send + Sync {
    fn aggregate_type(&self) -> &'static str;
    fn readiness(&self) -> Result<(), RegistryError>;
    fn as_any(&self) -> &dyn Any;
}

impl<A: Aggregate> RegisteredKind for KindRegistration<A> {
    fn aggregate_type(&self) -> &'static str {
        A::aggregate_type()
    }

    fn readiness(&self) -> Result<(), RegistryError> {
        if self.factory.is_none() {
            return Err(RegistryError::FactoryConstructionFailure {
                aggregate_type: A::aggregate_type(),
            });
        }

        let missing = self.applier.missing_kinds();
        if !missing.is_empty() {
            return Err(RegistryError::IncompleteDispatch {
                aggregate_type: A::aggregate_type(),
                missing,
            });
        }

        let undeclared = self.applier.undeclared_kinds();
        if !undeclared.is_empty() {
            return Err(RegistryError::UndeclaredEventKinds {
                aggregate_type: A::aggregate_type(),
                kinds: undeclared,
            });
        }

        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry mapping aggregate kinds to their applier and zero-value factory.
#[derive(Default)]
pub struct AggregateRegistry {
    kinds: HashMap<&'static str, Box<dyn RegisteredKind>>,
}

impl AggregateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an aggregate kind. Each kind may be registered once.
    pub fn register<A: Aggregate>(
        &mut self,
        registration: KindRegistration<A>,
    ) -> Result<(), RegistryError> {
        let aggregate_type = A::aggregate_type();
        if self.kinds.contains_key(aggregate_type) {
            return Err(RegistryError::DuplicateKind(aggregate_type));
        }
        self.kinds.insert(aggregate_type, Box::new(registration));
        Ok(())
    }

    /// Registered aggregate type names, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.kinds.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Checks every registered kind, returning the first failure.
    ///
    /// All failures are logged, not just the first.
    pub fn ensure_ready(&self) -> Result<(), RegistryError> {
        let mut first_failure = None;
        for kind in self.kinds() {
            if let Err(err) = self.kinds[kind].readiness() {
                tracing::error!(aggregate_type = kind, error = %err, "aggregate kind not ready");
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => {
                tracing::info!(kinds = self.kinds.len(), "aggregate registry ready");
                Ok(())
            }
        }
    }

    /// Builds a zero-state instance of `A` through its registered factory.
    pub fn zero<A: Aggregate>(&self) -> Result<A, AggregateError> {
        let factory = self
            .entry::<A>()?
            .factory
            .ok_or(RegistryError::FactoryConstructionFailure {
                aggregate_type: A::aggregate_type(),
            })?;
        Ok(factory())
    }

    pub fn applier<A: Aggregate>(&self) -> Result<Arc<EventApplier<A>>, AggregateError> {
        Ok(Arc::clone(&self.entry::<A>()?.applier))
    }

    fn entry<A: Aggregate>(&self) -> Result<&KindRegistration<A>, AggregateError> {
        self.kinds
            .get(A::aggregate_type())
            .and_then(|kind| kind.as_any().downcast_ref::<KindRegistration<A>>())
            .ok_or(AggregateError::KindNotRegistered(A::aggregate_type()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::DomainEvent;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum DoorEvent {
        Opened,
        Closed,
    }

    impl DomainEvent for DoorEvent {
        fn event_type(&self) -> &'static str {
            match self {
                DoorEvent::Opened => "Opened",
                DoorEvent::Closed => "Closed",
            }
        }

        fn event_kinds() -> &'static [&'static str] {
            &["Opened", "Closed"]
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Door {
        open: bool,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("door error")]
    struct DoorError;

    impl Aggregate for Door {
        type Event = DoorEvent;
        type Error = DoorError;

        fn aggregate_type() -> &'static str {
            "Door"
        }
    }

    fn open(door: &mut Door, _: &DoorEvent) {
        door.open = true;
    }

    fn close(door: &mut Door, _: &DoorEvent) {
        door.open = false;
    }

    fn full_applier() -> EventApplier<Door> {
        EventApplier::new().on("Opened", open).on("Closed", close)
    }

    #[test]
    fn ready_with_factory_and_full_dispatch() {
        let mut registry = AggregateRegistry::new();
        registry
            .register(KindRegistration::new(full_applier()).with_factory(|| Door { open: false }))
            .unwrap();

        assert!(registry.ensure_ready().is_ok());
        assert_eq!(registry.zero::<Door>().unwrap(), Door { open: false });
        assert_eq!(registry.kinds(), vec!["Door"]);
    }

    #[test]
    fn missing_factory_fails_readiness() {
        let mut registry = AggregateRegistry::new();
        registry
            .register(KindRegistration::new(full_applier()))
            .unwrap();

        assert!(matches!(
            registry.ensure_ready(),
            Err(RegistryError::FactoryConstructionFailure {
                aggregate_type: "Door"
            })
        ));
        assert!(matches!(
            registry.zero::<Door>(),
            Err(AggregateError::Registry(
                RegistryError::FactoryConstructionFailure { .. }
            ))
        ));
    }

    #[test]
    fn partial_dispatch_fails_readiness() {
        let mut registry = AggregateRegistry::new();
        registry
            .register(
                KindRegistration::new(EventApplier::<Door>::new().on("Opened", open))
                    .with_factory(|| Door { open: false }),
            )
            .unwrap();

        match registry.ensure_ready() {
            Err(RegistryError::IncompleteDispatch { missing, .. }) => {
                assert_eq!(missing, vec!["Closed"]);
            }
            other => panic!("expected IncompleteDispatch, got {other:?}"),
        }
    }

    #[test]
    fn undeclared_kind_fails_readiness() {
        let mut registry = AggregateRegistry::new();
        registry
            .register(
                KindRegistration::new(full_applier().on("Slammed", close))
                    .with_factory(|| Door { open: false }),
            )
            .unwrap();

        assert!(matches!(
            registry.ensure_ready(),
            Err(RegistryError::UndeclaredEventKinds { .. })
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = AggregateRegistry::new();
        registry
            .register(KindRegistration::new(full_applier()).with_factory(|| Door { open: false }))
            .unwrap();

        let err = registry
            .register(KindRegistration::new(full_applier()).with_factory(|| Door { open: true }))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKind("Door")));
    }

    #[test]
    fn unregistered_kind_is_reported() {
        let registry = AggregateRegistry::new();
        assert!(matches!(
            registry.applier::<Door>(),
            Err(AggregateError::KindNotRegistered("Door"))
        ));
    }
}
