use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per normalized package name.
///
/// Entries are weak: a name's lock lives exactly as long as somebody holds
/// or waits on it, and dead entries are swept on the next acquisition.
#[derive(Debug, Default)]
pub(crate) struct PackageLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}
impl PackageLocks {
    pub(crate) async fn acquire(&self, normalized_name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| lock.strong_count() > 0);
            match locks.get(normalized_name).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    locks.insert(normalized_name.to_string(), Arc::downgrade(&lock));
                    lock
                },
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
