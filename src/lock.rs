use std::{cell::Cell, marker::PhantomData};

use parking_lot::lock_api::{GuardNoSend, RawMutex};

/// A lock that doesn't lock.
///
/// It is the default lock policy: compositions using it pay nothing for
/// synchronization, and because `NoLock` is not `Sync` neither is anything
/// built around it, so the compiler refuses to share it between threads.
pub struct NoLock {
    _not_sync: PhantomData<Cell<()>>,
}

unsafe impl RawMutex for NoLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        _not_sync: PhantomData,
    };

    type GuardMarker = GuardNoSend;

    #[inline]
    fn lock(&self) {}

    #[inline]
    fn try_lock(&self) -> bool {
        true
    }

    #[inline]
    unsafe fn unlock(&self) {}
}

/// The lock used when a composition has to be shared between threads.
pub type DefaultMutex = parking_lot::RawMutex;
