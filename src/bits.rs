//! Lock-free bitwise read-modify-write operations on atomic words.
//!
//! The pool and block bitmaps are driven entirely through these primitives:
//! plain AND/OR/XOR variants that report the word before and after the
//! update, and conditional variants that retry a compare-and-swap until the
//! update lands or the predicate rejects the observed value.

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};

/// Atomic bitwise operations over a single word.
///
/// Non-conditional operations are single hardware RMW instructions. The
/// conditional variants evaluate the predicate against the value observed
/// immediately before each compare-and-swap attempt; the predicate may run
/// many times under contention.
pub trait AtomicBitwise {
    type Word: Copy + PartialEq;

    /// `word &= mask`, returning the value before and after.
    fn and(&self, mask: Self::Word) -> (Self::Word, Self::Word);
    /// `word |= mask`, returning the value before and after.
    fn or(&self, mask: Self::Word) -> (Self::Word, Self::Word);
    /// `word ^= mask`, returning the value before and after.
    fn xor(&self, mask: Self::Word) -> (Self::Word, Self::Word);
    /// Clears every bit of `mask`.
    fn clear_bits(&self, mask: Self::Word) -> (Self::Word, Self::Word);
    /// Sets every bit of `mask`.
    fn set_bits(&self, mask: Self::Word) -> (Self::Word, Self::Word);

    /// `word &= mask` if `pred` accepts the current value, else no-op
    /// returning `(current, current)`.
    fn and_if<P>(&self, pred: P, mask: Self::Word) -> (Self::Word, Self::Word)
    where
        P: FnMut(Self::Word) -> bool;
    fn or_if<P>(&self, pred: P, mask: Self::Word) -> (Self::Word, Self::Word)
    where
        P: FnMut(Self::Word) -> bool;
    fn xor_if<P>(&self, pred: P, mask: Self::Word) -> (Self::Word, Self::Word)
    where
        P: FnMut(Self::Word) -> bool;
    fn clear_bits_if<P>(&self, pred: P, mask: Self::Word) -> (Self::Word, Self::Word)
    where
        P: FnMut(Self::Word) -> bool;
    fn set_bits_if<P>(&self, pred: P, mask: Self::Word) -> (Self::Word, Self::Word)
    where
        P: FnMut(Self::Word) -> bool;

    /// Argument-carrying conditional AND.
    fn and_if_with<A, P>(&self, pred: P, arg: &A, mask: Self::Word) -> (Self::Word, Self::Word)
    where
        P: FnMut(Self::Word, &A) -> bool;
    fn or_if_with<A, P>(&self, pred: P, arg: &A, mask: Self::Word) -> (Self::Word, Self::Word)
    where
        P: FnMut(Self::Word, &A) -> bool;
    fn xor_if_with<A, P>(&self, pred: P, arg: &A, mask: Self::Word) -> (Self::Word, Self::Word)
    where
        P: FnMut(Self::Word, &A) -> bool;
}

macro_rules! atomic_bitwise {
    ($atomic:ty, $word:ty) => {
        impl AtomicBitwise for $atomic {
            type Word = $word;

            fn and(&self, mask: $word) -> ($word, $word) {
                let prior = self.fetch_and(mask, Ordering::AcqRel);
                (prior, prior & mask)
            }

            fn or(&self, mask: $word) -> ($word, $word) {
                let prior = self.fetch_or(mask, Ordering::AcqRel);
                (prior, prior | mask)
            }

            fn xor(&self, mask: $word) -> ($word, $word) {
                let prior = self.fetch_xor(mask, Ordering::AcqRel);
                (prior, prior ^ mask)
            }

            fn clear_bits(&self, mask: $word) -> ($word, $word) {
                self.and(!mask)
            }

            fn set_bits(&self, mask: $word) -> ($word, $word) {
                self.or(mask)
            }

            fn and_if<P>(&self, mut pred: P, mask: $word) -> ($word, $word)
            where
                P: FnMut($word) -> bool,
            {
                let mut current = self.load(Ordering::Acquire);
                loop {
                    if !pred(current) {
                        return (current, current);
                    }
                    match self.compare_exchange_weak(
                        current,
                        current & mask,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(prior) => return (prior, prior & mask),
                        Err(observed) => current = observed,
                    }
                }
            }

            fn or_if<P>(&self, mut pred: P, mask: $word) -> ($word, $word)
            where
                P: FnMut($word) -> bool,
            {
                let mut current = self.load(Ordering::Acquire);
                loop {
                    if !pred(current) {
                        return (current, current);
                    }
                    match self.compare_exchange_weak(
                        current,
                        current | mask,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(prior) => return (prior, prior | mask),
                        Err(observed) => current = observed,
                    }
                }
            }

            fn xor_if<P>(&self, mut pred: P, mask: $word) -> ($word, $word)
            where
                P: FnMut($word) -> bool,
            {
                let mut current = self.load(Ordering::Acquire);
                loop {
                    if !pred(current) {
                        return (current, current);
                    }
                    match self.compare_exchange_weak(
                        current,
                        current ^ mask,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(prior) => return (prior, prior ^ mask),
                        Err(observed) => current = observed,
                    }
                }
            }

            fn clear_bits_if<P>(&self, pred: P, mask: $word) -> ($word, $word)
            where
                P: FnMut($word) -> bool,
            {
                self.and_if(pred, !mask)
            }

            fn set_bits_if<P>(&self, pred: P, mask: $word) -> ($word, $word)
            where
                P: FnMut($word) -> bool,
            {
                self.or_if(pred, mask)
            }

            fn and_if_with<A, P>(&self, mut pred: P, arg: &A, mask: $word) -> ($word, $word)
            where
                P: FnMut($word, &A) -> bool,
            {
                self.and_if(|w| pred(w, arg), mask)
            }

            fn or_if_with<A, P>(&self, mut pred: P, arg: &A, mask: $word) -> ($word, $word)
            where
                P: FnMut($word, &A) -> bool,
            {
                self.or_if(|w| pred(w, arg), mask)
            }

            fn xor_if_with<A, P>(&self, mut pred: P, arg: &A, mask: $word) -> ($word, $word)
            where
                P: FnMut($word, &A) -> bool,
            {
                self.xor_if(|w| pred(w, arg), mask)
            }
        }
    };
}

atomic_bitwise!(AtomicU32, u32);
atomic_bitwise!(AtomicU64, u64);
atomic_bitwise!(AtomicI32, i32);
atomic_bitwise!(AtomicI64, i64);
