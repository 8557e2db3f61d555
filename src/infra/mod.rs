//! Infrastructure adapters for the relational store and API credentials.

pub mod credentials;
pub mod persistence;

pub use credentials::{Credential, QueryCredentialSource, StaticCredentialSource, CREDENTIAL_QUERY};
pub use persistence::{
    query_queue, query_task, Command, Connection, ConnectionFactory, InMemoryConnection,
    InMemoryDatabase, QueryExecutor, QueryQueue, ResultRows,
};
