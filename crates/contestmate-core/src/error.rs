use contestmate_cache::CacheError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Chat operations need a signed-in user; nothing is sent or recorded
    /// without one.
    #[error("no user is signed in")]
    NotSignedIn,

    #[error(transparent)]
    Cache(#[from] CacheError),
}
