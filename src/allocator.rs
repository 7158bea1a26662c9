//! Listen port allocation for proxy containers.

use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out unique, strictly increasing listen ports above a base port.
///
/// Released ports are never reused and the counter has no upper bound: under
/// sustained churn it will eventually run past the valid port range. This
/// mirrors how the service has always numbered ports, so clients can rely on
/// allocation order; bounding or recycling the counter would change that.
#[derive(Debug)]
pub struct PortAllocator {
    next: AtomicU32,
}

impl PortAllocator {
    /// Create an allocator whose first handed-out port is `base_port + 1`.
    pub fn new(base_port: u32) -> Self {
        Self {
            next: AtomicU32::new(base_port),
        }
    }

    /// Allocate the next port. Concurrent callers never observe the same
    /// value.
    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_first_port_is_above_base() {
        let allocator = PortAllocator::new(40000);
        assert_eq!(allocator.next(), 40001);
        assert_eq!(allocator.next(), 40002);
        assert_eq!(allocator.next(), 40003);
    }

    #[test]
    fn test_concurrent_allocations_are_distinct() {
        let allocator = Arc::new(PortAllocator::new(40000));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let allocator = Arc::clone(&allocator);
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| allocator.next()).collect::<Vec<u32>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for port in handle.join().expect("allocation thread panicked") {
                assert!(port > 40000);
                assert!(seen.insert(port), "port {} handed out twice", port);
            }
        }
        assert_eq!(seen.len(), 800);
    }
}
