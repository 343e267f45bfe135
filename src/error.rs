use std::any::Any;
use std::fmt;

/// Error taxonomy for the runtime.
///
/// `StealResult::LostRace` (see [`crate::deque`]) is deliberately not a variant here:
/// losing a steal race is a retry signal, not a failure.
#[derive(Debug)]
pub enum Error {
    /// The stacklet allocator could not grow: the system allocator returned null.
    Alloc,
    /// A user task's body panicked or returned an application error.
    ///
    /// Only the first error observed for a given root is retained; later siblings
    /// are logged and dropped (first-error-wins).
    Task(Box<dyn Any + Send>),
    /// A scheduler invariant was violated (e.g. a non-empty async stack observed
    /// where the protocol guarantees emptiness). This is a fatal programmer error.
    InvariantViolation(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Alloc => write!(f, "async stack allocation failed"),
            Error::Task(_) => write!(f, "task failed"),
            Error::InvariantViolation(msg) => write!(f, "scheduler invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
