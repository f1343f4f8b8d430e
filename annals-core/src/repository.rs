//! Aggregate reconstruction on top of an [`EventStore`].
//!
//! [`AggregateRepository`] rebuilds aggregate state by folding a
//! stream's events, oldest first, over a caller-supplied initial
//! state. The store remains the single source of truth; no snapshot
//! or cache sits in between, so two loads of the same stream always
//! produce the same state.

use thiserror::Error;
use uuid::Uuid;

use crate::{event::Event, store::EventStore};

type InitialFn<T> = Box<dyn Fn() -> T + Send + Sync>;
type ApplierFn<T, E> = Box<dyn Fn(T, &E) -> T + Send + Sync>;
type VersionApplierFn<T> = Box<dyn Fn(T, i64) -> T + Send + Sync>;

/// Errors from aggregate lookups that insist on the aggregate existing.
#[derive(Debug, Error)]
pub enum RepositoryError<SE> {
    /// The stream has no events to fold.
    #[error("no events found for aggregate {aggregate_id} in stream {aggregate_name}")]
    AggregateNotFound {
        aggregate_id: Uuid,
        aggregate_name: String,
    },
    #[error(transparent)]
    Store(#[from] SE),
}

/// Rebuilds aggregates of type `T` from the events of one stream name.
///
/// The fold is supplied as two functions: `initial` produces the
/// zero-event state and `applier` advances it by one event. After the
/// fold an optional version applier can stamp the stream version onto
/// the state, for aggregates that carry their own version for
/// conditional saves.
pub struct AggregateRepository<T, E, S> {
    store: S,
    aggregate_name: String,
    initial: InitialFn<T>,
    applier: ApplierFn<T, E>,
    version_applier: Option<VersionApplierFn<T>>,
}

impl<T, E, S> AggregateRepository<T, E, S>
where
    E: Event,
    S: EventStore<E>,
{
    pub fn new<I, A>(store: S, aggregate_name: impl Into<String>, initial: I, applier: A) -> Self
    where
        I: Fn() -> T + Send + Sync + 'static,
        A: Fn(T, &E) -> T + Send + Sync + 'static,
    {
        Self {
            store,
            aggregate_name: aggregate_name.into(),
            initial: Box::new(initial),
            applier: Box::new(applier),
            version_applier: None,
        }
    }

    /// Stamp the folded event count onto the state after each load.
    #[must_use]
    pub fn with_version_applier<VA>(mut self, version_applier: VA) -> Self
    where
        VA: Fn(T, i64) -> T + Send + Sync + 'static,
    {
        self.version_applier = Some(Box::new(version_applier));
        self
    }

    /// The stream name this repository reads and writes.
    #[must_use]
    pub fn aggregate_name(&self) -> &str {
        &self.aggregate_name
    }

    /// Direct access to the underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    fn fold(&self, events: Vec<E>) -> T {
        let count = events.len() as i64;
        let state = events
            .iter()
            .fold((self.initial)(), |acc, event| (self.applier)(acc, event));
        match &self.version_applier {
            Some(version_applier) => version_applier(state, count),
            None => state,
        }
    }

    /// Append an event to its aggregate's stream.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn save(&self, event: &E) -> Result<(), S::Error> {
        self.store.save(event, &self.aggregate_name).await
    }

    /// Append an event only if the stream is at `expected_version`.
    ///
    /// # Errors
    ///
    /// Propagates the store's error, including its conflict variant.
    pub async fn save_expecting(&self, event: &E, expected_version: i64) -> Result<(), S::Error> {
        self.store
            .save_expecting(event, &self.aggregate_name, expected_version)
            .await
    }

    /// Rebuild an aggregate, or `None` when its stream has no events.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    #[tracing::instrument(skip(self), fields(aggregate_name = %self.aggregate_name))]
    pub async fn find(&self, aggregate_id: Uuid) -> Result<Option<T>, S::Error> {
        let events = self
            .store
            .find_all(aggregate_id, &self.aggregate_name)
            .await?;
        if events.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.fold(events)))
    }

    /// Rebuild an aggregate that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::AggregateNotFound`] when the stream
    /// has no events.
    pub async fn get(&self, aggregate_id: Uuid) -> Result<T, RepositoryError<S::Error>> {
        self.find(aggregate_id)
            .await?
            .ok_or_else(|| RepositoryError::AggregateNotFound {
                aggregate_id,
                aggregate_name: self.aggregate_name.clone(),
            })
    }

    /// Rebuild an aggregate as of the moment `to_event` was stored.
    ///
    /// Returns `None` when the event is not part of the stream.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    #[tracing::instrument(skip(self, to_event), fields(aggregate_name = %self.aggregate_name, event_id = %to_event.event_id()))]
    pub async fn find_to_event(&self, to_event: &E) -> Result<Option<T>, S::Error> {
        let events = self
            .store
            .find_all_to_event(to_event, &self.aggregate_name)
            .await?;
        if events.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.fold(events)))
    }

    /// Rebuild an aggregate as of `to_event`, which must be stored.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::AggregateNotFound`] when the event
    /// is not part of the stream.
    pub async fn get_to_event(&self, to_event: &E) -> Result<T, RepositoryError<S::Error>> {
        self.find_to_event(to_event)
            .await?
            .ok_or_else(|| RepositoryError::AggregateNotFound {
                aggregate_id: to_event.aggregate_id(),
                aggregate_name: self.aggregate_name.clone(),
            })
    }

    /// Rebuild every aggregate with at least one event in this stream
    /// name.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    #[tracing::instrument(skip(self), fields(aggregate_name = %self.aggregate_name))]
    pub async fn find_all(&self) -> Result<Vec<T>, S::Error> {
        let grouped = self.store.find_all_grouped(&self.aggregate_name).await?;
        Ok(grouped
            .into_values()
            .map(|events| self.fold(events))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{
        event::TypeTag,
        store::inmemory,
        versioning::NoVersioning,
    };

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Deposited {
        event_id: Uuid,
        account_id: Uuid,
        amount: i64,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum AccountEvent {
        Deposited(Deposited),
    }

    impl From<Deposited> for AccountEvent {
        fn from(e: Deposited) -> Self {
            Self::Deposited(e)
        }
    }

    impl Event for AccountEvent {
        fn event_id(&self) -> Uuid {
            let Self::Deposited(e) = self;
            e.event_id
        }

        fn aggregate_id(&self) -> Uuid {
            let Self::Deposited(e) = self;
            e.account_id
        }

        fn type_tag(&self) -> TypeTag {
            TypeTag::of::<Deposited>()
        }
    }

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Account {
        balance: i64,
        version: i64,
    }

    type Repository =
        AggregateRepository<Account, AccountEvent, inmemory::Store<AccountEvent, NoVersioning<AccountEvent>>>;

    fn repository() -> Repository {
        let mut versioning = NoVersioning::new();
        versioning
            .register::<Deposited, _>("MoneyDeposited", |e| {
                let AccountEvent::Deposited(inner) = e;
                Some(inner)
            })
            .unwrap();
        AggregateRepository::new(
            inmemory::Store::new(versioning),
            "Account",
            Account::default,
            |mut account: Account, event: &AccountEvent| {
                let AccountEvent::Deposited(deposited) = event;
                account.balance += deposited.amount;
                account
            },
        )
        .with_version_applier(|mut account, version| {
            account.version = version;
            account
        })
    }

    fn deposited(account_id: Uuid, amount: i64) -> AccountEvent {
        AccountEvent::Deposited(Deposited {
            event_id: Uuid::new_v4(),
            account_id,
            amount,
        })
    }

    #[tokio::test]
    async fn find_returns_none_for_unknown_aggregate() {
        let repository = repository();
        let account = repository.find(Uuid::new_v4()).await.unwrap();
        assert!(account.is_none());
    }

    #[tokio::test]
    async fn get_fails_for_unknown_aggregate() {
        let repository = repository();
        let error = repository.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(error, RepositoryError::AggregateNotFound { .. }));
    }

    #[tokio::test]
    async fn folds_events_in_append_order() {
        let repository = repository();
        let account_id = Uuid::new_v4();

        for amount in [100, 250, -50] {
            repository.save(&deposited(account_id, amount)).await.unwrap();
        }

        let account = repository.get(account_id).await.unwrap();
        assert_eq!(
            account,
            Account {
                balance: 300,
                version: 3,
            }
        );
    }

    #[tokio::test]
    async fn reloading_is_deterministic() {
        let repository = repository();
        let account_id = Uuid::new_v4();

        repository.save(&deposited(account_id, 10)).await.unwrap();
        repository.save(&deposited(account_id, 20)).await.unwrap();

        let first = repository.get(account_id).await.unwrap();
        let second = repository.get(account_id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn loads_state_as_of_a_past_event() {
        let repository = repository();
        let account_id = Uuid::new_v4();
        let second = deposited(account_id, 20);

        repository.save(&deposited(account_id, 10)).await.unwrap();
        repository.save(&second).await.unwrap();
        repository.save(&deposited(account_id, 40)).await.unwrap();

        let account = repository.get_to_event(&second).await.unwrap();
        assert_eq!(
            account,
            Account {
                balance: 30,
                version: 2,
            }
        );
    }

    #[tokio::test]
    async fn find_to_event_with_unstored_event_is_none() {
        let repository = repository();
        let account_id = Uuid::new_v4();

        repository.save(&deposited(account_id, 10)).await.unwrap();

        let never_stored = deposited(account_id, 99);
        let account = repository.find_to_event(&never_stored).await.unwrap();
        assert!(account.is_none());
    }

    #[tokio::test]
    async fn find_all_rebuilds_every_aggregate_in_the_stream() {
        let repository = repository();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        repository.save(&deposited(first, 10)).await.unwrap();
        repository.save(&deposited(second, 20)).await.unwrap();
        repository.save(&deposited(second, 5)).await.unwrap();

        let mut balances: Vec<_> = repository
            .find_all()
            .await
            .unwrap()
            .into_iter()
            .map(|account| account.balance)
            .collect();
        balances.sort_unstable();
        assert_eq!(balances, [10, 25]);
    }

    #[tokio::test]
    async fn conditional_save_surfaces_conflicts() {
        let repository = repository();
        let account_id = Uuid::new_v4();

        repository.save(&deposited(account_id, 10)).await.unwrap();
        let account = repository.get(account_id).await.unwrap();

        repository
            .save_expecting(&deposited(account_id, 20), account.version)
            .await
            .unwrap();

        let error = repository
            .save_expecting(&deposited(account_id, 30), account.version)
            .await
            .unwrap_err();
        assert!(matches!(error, inmemory::InMemoryError::Conflict(_)));
    }
}
