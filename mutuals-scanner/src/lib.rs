pub mod client;
pub mod credential;
pub mod error;
pub mod result;

pub use client::{DEFAULT_API_BASE, RelationshipClient, RelationshipSource};
pub use credential::{
    ChainedProvider, Credential, CredentialProvider, EnvToken, StaticToken, TokenFile,
};
pub use error::ScanError;
pub use result::{Guild, MutualGuild, NeighborRef, Relationship, RelationshipKind, UserProfile};
