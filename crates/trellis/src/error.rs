use crate::path::ModulePath;
use thiserror::Error;

/// Fatal configuration and usage errors.
///
/// Recoverable misuses (committing an unknown mutation type, unregistering a
/// non-runtime module, structural additions during a hot update) are *not*
/// errors: they are logged and the operation becomes a no-op.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("the root module cannot be dynamically registered or unregistered")]
    RootModuleNotDynamic,

    #[error("no module registered at path \"{0}\"")]
    UnknownModule(ModulePath),

    #[error("cannot register at \"{0}\": parent module does not exist")]
    MissingParent(ModulePath),

    #[error("module key {0:?} may not contain '/' (reserved as the namespace separator)")]
    InvalidModuleKey(String),

    #[error("two modules resolve to the same namespace \"{0}\"")]
    NamespaceCollision(String),

    #[error("payload object is missing a string \"type\" field")]
    BadTypeField,

    #[error("the store backing this handle has been dropped")]
    InactiveStore,
}

pub type StoreResult<T> = Result<T, StoreError>;
