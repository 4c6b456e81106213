#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task submitted while not in the NEW state")]
    AlreadyScheduled,

    /// Reserved. Task cancellation is not implemented at this layer; the variant exists so that downstream matches
    /// don't need to change if it is added later.
    #[error("task was cancelled")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
