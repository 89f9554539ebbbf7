//! Exclusive access to accelerator devices.
//!
//! Synthesis and transcription share one device and must never overlap on
//! it. A pass holds an [`AcceleratorLease`] for its whole duration and hands
//! the leased device id to both capabilities. Independent worker processes
//! each own a disjoint set of device ids.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

#[derive(Debug)]
struct PoolState {
    free: Vec<usize>,
}

/// A fixed set of device slots handed out one lease at a time.
#[derive(Debug, Clone)]
pub struct AcceleratorPool {
    inner: Arc<(Mutex<PoolState>, Condvar)>,
    devices: usize,
}

impl Default for AcceleratorPool {
    fn default() -> Self {
        Self::new(1)
    }
}

impl AcceleratorPool {
    /// Pool with `devices` slots, numbered from 0. Zero is treated as one.
    pub fn new(devices: usize) -> Self {
        Self::with_devices(0..devices.max(1))
    }

    /// Pool over the given device ids, leased lowest first. An empty list
    /// falls back to device 0.
    pub fn with_devices(ids: impl IntoIterator<Item = usize>) -> Self {
        let mut free: Vec<usize> = ids.into_iter().collect();
        free.sort_unstable();
        free.dedup();
        if free.is_empty() {
            free.push(0);
        }
        free.reverse();
        let devices = free.len();
        Self {
            inner: Arc::new((Mutex::new(PoolState { free }), Condvar::new())),
            devices,
        }
    }

    pub fn devices(&self) -> usize {
        self.devices
    }

    /// Block until a device is free and lease it.
    pub fn acquire(&self) -> AcceleratorLease {
        let (lock, available) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(device) = state.free.pop() {
                log::debug!("Leased accelerator {device}");
                return AcceleratorLease {
                    pool: self.inner.clone(),
                    device,
                };
            }
            state = available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Lease a device if one is free right now.
    pub fn try_acquire(&self) -> Option<AcceleratorLease> {
        let (lock, _) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        state.free.pop().map(|device| AcceleratorLease {
            pool: self.inner.clone(),
            device,
        })
    }
}

/// Exclusive use of one device; released on drop.
#[derive(Debug)]
pub struct AcceleratorLease {
    pool: Arc<(Mutex<PoolState>, Condvar)>,
    device: usize,
}

impl AcceleratorLease {
    pub fn device(&self) -> usize {
        self.device
    }
}

impl Drop for AcceleratorLease {
    fn drop(&mut self) {
        let (lock, available) = &*self.pool;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        state.free.push(self.device);
        available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::AcceleratorPool;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn single_device_is_exclusive() {
        let pool = AcceleratorPool::default();
        let lease = pool.acquire();
        assert_eq!(lease.device(), 0);
        assert!(pool.try_acquire().is_none());

        drop(lease);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn hands_out_distinct_devices() {
        let pool = AcceleratorPool::new(2);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a.device(), b.device());
        assert!(pool.try_acquire().is_none());
    }

    #[test]
    fn leases_only_the_configured_ids() {
        let pool = AcceleratorPool::with_devices([3, 1, 3]);
        assert_eq!(pool.devices(), 2);
        let first = pool.acquire();
        let second = pool.acquire();
        assert_eq!((first.device(), second.device()), (1, 3));

        let fallback = AcceleratorPool::with_devices(Vec::new());
        assert_eq!(fallback.acquire().device(), 0);
    }

    #[test]
    fn waiting_worker_gets_released_device() {
        let pool = AcceleratorPool::new(0);
        assert_eq!(pool.devices(), 1);
        let lease = pool.acquire();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let lease = pool.acquire();
                tx.send(lease.device()).expect("send");
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(lease);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).expect("device"), 0);
        waiter.join().expect("join");
    }
}
