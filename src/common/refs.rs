//! Reference Counting
//!
//! Atomic counter used by segments, blocks and file handles. The count starts
//! at 1 (the creator's reference). `release` reports whether the calling
//! thread produced the 1 → 0 transition; exactly one caller ever sees `true`,
//! and that caller runs the owner's teardown.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{PillarError, Result};

#[derive(Debug)]
pub struct RefCount {
    refs: AtomicUsize,
}

impl RefCount {
    /// New counter holding the creator's reference
    pub fn new() -> Self {
        Self {
            refs: AtomicUsize::new(1),
        }
    }

    /// Take one more reference. Fails once the count has reached zero.
    pub fn acquire(&self) -> Result<usize> {
        let mut current = self.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(PillarError::Destroyed(
                    "acquire after last reference was released".to_string(),
                ));
            }
            match self.refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current + 1),
                Err(actual) => current = actual,
            }
        }
    }

    /// Drop one reference. Returns `Ok(true)` only for the call that moved
    /// the count from 1 to 0.
    pub fn release(&self) -> Result<bool> {
        let mut current = self.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(PillarError::Destroyed(
                    "release after last reference was released".to_string(),
                ));
            }
            match self.refs.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current == 1),
                Err(actual) => current = actual,
            }
        }
    }

    /// Current number of references
    pub fn count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// True once the last reference is gone
    pub fn is_zero(&self) -> bool {
        self.count() == 0
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_single_release_hits_zero() {
        let refs = RefCount::new();
        assert_eq!(refs.count(), 1);
        assert!(refs.release().unwrap());
        assert!(refs.is_zero());
    }

    #[test]
    fn test_release_past_zero_is_an_error() {
        let refs = RefCount::new();
        refs.release().unwrap();
        assert!(matches!(refs.release(), Err(PillarError::Destroyed(_))));
        assert!(matches!(refs.acquire(), Err(PillarError::Destroyed(_))));
        assert_eq!(refs.count(), 0);
    }

    #[test]
    fn test_concurrent_pairs_fire_once() {
        for _ in 0..20 {
            let refs = RefCount::new();
            let fired = AtomicUsize::new(0);

            crossbeam::scope(|s| {
                for _ in 0..8 {
                    s.spawn(|_| {
                        for _ in 0..200 {
                            refs.acquire().unwrap();
                            if refs.release().unwrap() {
                                fired.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    });
                }
            })
            .unwrap();

            assert_eq!(refs.count(), 1);
            if refs.release().unwrap() {
                fired.fetch_add(1, Ordering::SeqCst);
            }
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }
    }
}
