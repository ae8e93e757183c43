//! Bounded pool of device slots
//!
//! One slot per encoder worker, handed out through a flume channel that starts
//! out holding `0..W`. A [`DeviceLease`] owns its slot until dropped, which
//! puts the slot back, so a device can never be double-booked or leaked.

use flume::{Receiver, Sender};

#[derive(Debug, Clone)]
pub struct DevicePool {
    sender: Sender<usize>,
    receiver: Receiver<usize>,
    size: usize,
}

/// Exclusive use of one device slot
#[derive(Debug)]
pub struct DeviceLease {
    slot: usize,
    sender: Sender<usize>,
}

impl DeviceLease {
    /// Index of the device (and encoder worker) this lease grants.
    pub fn device_index(&self) -> usize {
        self.slot
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        // Only fails once the pool itself is gone, and then nobody is waiting.
        let _ = self.sender.send(self.slot);
    }
}

impl DevicePool {
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = flume::bounded(size);
        for slot in 0..size {
            let _ = sender.try_send(slot);
        }
        Self {
            sender,
            receiver,
            size,
        }
    }

    /// Wait for a free device.
    pub async fn acquire(&self) -> Option<DeviceLease> {
        let slot = self.receiver.recv_async().await.ok()?;
        Some(self.lease(slot))
    }

    /// Take a free device without waiting.
    pub fn try_acquire(&self) -> Option<DeviceLease> {
        self.receiver.try_recv().ok().map(|slot| self.lease(slot))
    }

    fn lease(&self, slot: usize) -> DeviceLease {
        tracing::debug!("Leased device {}", slot);
        DeviceLease {
            slot,
            sender: self.sender.clone(),
        }
    }

    /// Number of slots (W)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.receiver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_are_exclusive() {
        let pool = DevicePool::new(3);
        let leases = vec![
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ];

        let slots: HashSet<usize> = leases.iter().map(DeviceLease::device_index).collect();
        assert_eq!(slots, HashSet::from([0, 1, 2]));
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn test_drop_returns_slot() {
        let pool = DevicePool::new(2);
        let first = pool.acquire().await.unwrap();
        let _second = pool.acquire().await.unwrap();
        let freed = first.device_index();

        drop(first);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.try_acquire().unwrap().device_index(), freed);
    }

    #[test]
    fn test_acquire_pending_until_release() {
        let pool = DevicePool::new(1);
        let lease = pool.try_acquire().unwrap();

        let mut waiter = tokio_test::task::spawn(pool.acquire());
        tokio_test::assert_pending!(waiter.poll());

        drop(lease);
        assert!(waiter.is_woken());
        let lease = tokio_test::assert_ready!(waiter.poll()).unwrap();
        assert_eq!(lease.device_index(), 0);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let pool = DevicePool::new(1);
        let lease = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|l| l.device_index()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(lease);
        assert_eq!(waiter.await.unwrap(), Some(0));
    }
}
