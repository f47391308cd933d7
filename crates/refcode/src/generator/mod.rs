
use crate::{
    code::{CODE_SPACE, Code},
    rand::{RandSource, ThreadRandom},
};

/// Largest multiple of [`CODE_SPACE`] representable in a `u64`. Draws at or
/// above it are rejected so that every code is equally likely.
const ACCEPT_BELOW: u64 = u64::MAX - (u64::MAX % CODE_SPACE);

/// Stateless generator of candidate codes.
///
/// Every call to [`generate`](Self::generate) draws a fresh code, each letter
/// independently and uniformly from `A-Z`. Nothing is remembered between
/// calls, so the same candidate may come up twice; callers must check every
/// candidate for uniqueness.
///
/// # Example
/// ```
/// use refcode::{CodeGenerator, Code};
///
/// let generator = CodeGenerator::random();
/// let code: Code = generator.generate();
/// assert!(Code::is_valid(code.as_str()));
/// ```
#[derive(Clone, Debug)]
pub struct CodeGenerator<R = ThreadRandom>
where
    R: RandSource<u64>,
{
    rng: R,
}

impl CodeGenerator<ThreadRandom> {
    /// Creates a generator backed by the thread-local RNG.
    pub const fn random() -> Self {
        Self { rng: ThreadRandom }
    }
}

impl Default for CodeGenerator<ThreadRandom> {
    fn default() -> Self {
        Self::random()
    }
}

impl<R> CodeGenerator<R>
where
    R: RandSource<u64>,
{
    /// Creates a generator over the given random source.
    pub const fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Draws a uniformly distributed candidate code.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    pub fn generate(&self) -> Code {
        loop {
            let draw = self.rng.rand();
            if draw < ACCEPT_BELOW {
                return Code::from_index(draw % CODE_SPACE);
            }
        }
    }
}
