use crate::const_init::ConstInit;
use spin::Mutex;

/// A value that only one caller at a time may touch.
///
/// This is the single global lock that serializes every heap operation made
/// through [`SegAlloc`](crate::SegAlloc). The heap itself never blocks, so
/// critical sections are short and a spin lock is enough.
pub(crate) struct Exclusive<T> {
    inner: Mutex<T>,
}

impl<T: ConstInit> ConstInit for Exclusive<T> {
    const INIT: Self = Exclusive {
        inner: Mutex::new(T::INIT),
    };
}

impl<T> Exclusive<T> {
    /// Get exclusive, mutable access to the inner value.
    ///
    /// `f` must not re-enter this method for the same `Exclusive`; that
    /// deadlocks.
    #[inline]
    pub(crate) fn with_exclusive_access<F, U>(&self, f: F) -> U
    where
        for<'x> F: FnOnce(&'x mut T) -> U,
    {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}
