/// A thread-safe source of uniform `u32`s. Cryptographic strength is not
/// required (§4.6) — only that concurrent engines can call it freely.
pub trait RandomSource: Send + Sync {
    fn next_u32(&self) -> u32;
}

/// Default [`RandomSource`] backed by `rand`'s thread-local generator.
#[derive(Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_u32(&self) -> u32 {
        rand::random()
    }
}
