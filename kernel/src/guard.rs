// Concurrency Guard
//
// One reader/writer lock per store, owning the backend it protects.
// Access only happens inside a scoped closure, so the lock is released
// on every exit path, including early error returns and panics.

use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct ConcurrencyGuard<B> {
    inner: RwLock<B>,
}

impl<B> ConcurrencyGuard<B> {
    pub fn new(backend: B) -> Self {
        Self {
            inner: RwLock::new(backend),
        }
    }

    /// Run `f` under the shared lock. Readers proceed in parallel.
    pub fn read<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        let backend = self.inner.read();
        f(&backend)
    }

    /// Run `f` under the exclusive lock.
    ///
    /// The whole closure is one critical section: a read-decide-write
    /// sequence inside it cannot interleave with any other operation.
    pub fn write<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        let mut backend = self.inner.write();
        f(&mut backend)
    }

    pub fn into_inner(self) -> B {
        self.inner.into_inner()
    }
}
