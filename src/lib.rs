#![doc = include_str!("../README.md")]

pub use annals_core::{
    codec,
    codec::{BodyCodec, BodyCodecError, JsonCodec},
    concurrency,
    concurrency::{OptimisticLockingConflict, StreamNotFound},
    event,
    event::{Event, TypeTag},
    repository,
    repository::{AggregateRepository, RepositoryError},
    typemap,
    typemap::{EventTypeMap, MappingError, NameAndVersion},
    versioning,
    versioning::{VersioningError, VersioningStrategy},
};

pub mod store {
    pub use annals_core::store::{inmemory, EventStore};

    #[cfg(feature = "postgres")]
    pub mod postgres {
        pub use annals_postgres::{Error, Store};
    }
}
