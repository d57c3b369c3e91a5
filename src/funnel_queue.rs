//! Funnel queue: a multi-producer, single-consumer (almost) lock-free queue.
//!
//! "Funnel" evokes requests from many producer threads being funneled down to
//! one consumer. Producers append with a single atomic exchange; the consumer
//! walks published `next` links and never contends with producers except at
//! the queue tail.
//!
//! The algorithm is not strictly lock-free: a producer preempted between its
//! exchange and its link publication hides any later entries from the
//! consumer until it resumes. The consumer observes this window as an empty
//! queue, never as corruption, and entries are never lost.
//!
//! Endpoints are split into a cloneable [`FunnelProducer`] and a unique
//! [`FunnelConsumer`], so the single-consumer requirement is enforced by the
//! type system rather than by convention. A polled value's node is freed
//! immediately; the design is immune to the ABA problem, so no deferred
//! reclamation is needed.
//!
//! To wait for data, spin (if safe) or pair the queue with an external event
//! signal; the queue itself never blocks.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

// =============================================================================
// NODE
// =============================================================================

struct Node<T> {
    /// The next (newer) entry in the queue. Null until a successor is
    /// published.
    next: AtomicPtr<Node<T>>,
    /// `None` only for the stub node.
    value: Option<T>,
}

impl<T> Node<T> {
    fn boxed(value: Option<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value,
        }))
    }
}

// =============================================================================
// SHARED QUEUE STATE
// =============================================================================

/// The queue proper. Producer and consumer ends live on separate cache lines
/// so concurrent puts do not bounce the consumer's line around.
#[repr(align(64))]
struct Shared<T> {
    /// The producers' end: an atomically exchanged pointer, never null.
    newest: AtomicPtr<Node<T>>,
    /// The consumer's end, owned by the consumer and never null. Only the
    /// unique `FunnelConsumer` mutates this.
    oldest: UnsafeCell<*mut Node<T>>,
    /// A permanently allocated dummy entry providing the non-null invariants
    /// above.
    stub: *mut Node<T>,
}

// The raw pointers thread through heap nodes that are handed between threads
// exactly once each; `oldest` is mutated only by the unique consumer handle.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Append a prepared node.
    ///
    /// Ordering: the node's fields must be visible before `previous.next`
    /// publishes it to the consumer, and the null `next` must be visible
    /// before other producers can reach the node through the exchange. The
    /// AcqRel exchange provides both edges.
    ///
    /// # Safety
    ///
    /// `node` must be a live, unlinked node owned by the caller.
    unsafe fn put_raw(&self, node: *mut Node<T>) {
        unsafe {
            (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
            let previous = self.newest.swap(node, Ordering::AcqRel);
            // A preemption right here hides the rest of the queue from the
            // consumer until the store below runs.
            (*previous).next.store(node, Ordering::Release);
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Both endpoints are gone, so no put is in flight and every link is
        // published; walk the chain and free it. The stub may sit anywhere
        // in the chain, or be parked off-chain.
        let mut current = *self.oldest.get_mut();
        let mut saw_stub = false;
        while !current.is_null() {
            if current == self.stub {
                saw_stub = true;
            }
            let node = unsafe { Box::from_raw(current) };
            current = node.next.load(Ordering::Relaxed);
        }
        if !saw_stub {
            drop(unsafe { Box::from_raw(self.stub) });
        }
    }
}

// =============================================================================
// PUBLIC ENDPOINTS
// =============================================================================

/// Constructor namespace for funnel queues; see [`FunnelQueue::new`].
#[derive(Debug)]
pub struct FunnelQueue<T> {
    _values: core::marker::PhantomData<T>,
}

impl<T: Send> FunnelQueue<T> {
    /// Create a queue, returning its two endpoints.
    ///
    /// The producer may be cloned freely and moved across threads; the
    /// consumer is unique.
    pub fn new() -> (FunnelProducer<T>, FunnelConsumer<T>) {
        let stub = Node::boxed(None);
        let shared = Arc::new(Shared {
            newest: AtomicPtr::new(stub),
            oldest: UnsafeCell::new(stub),
            stub,
        });

        (
            FunnelProducer {
                shared: Arc::clone(&shared),
            },
            FunnelConsumer { shared },
        )
    }
}

/// The multi-producer end of a funnel queue.
pub struct FunnelProducer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> FunnelProducer<T> {
    /// Put an entry on the end of the queue. Never blocks.
    pub fn put(&self, value: T) {
        let node = Node::boxed(Some(value));
        unsafe { self.shared.put_raw(node) };
    }
}

impl<T> Clone for FunnelProducer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for FunnelProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunnelProducer").finish_non_exhaustive()
    }
}

/// The single-consumer end of a funnel queue.
pub struct FunnelConsumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> FunnelConsumer<T> {
    /// Remove and return the oldest entry, or `None` if none is retrievable.
    ///
    /// `None` is returned both when the queue is empty and when a preempted
    /// producer has not yet published its link; poll again later in the
    /// second case.
    pub fn poll(&mut self) -> Option<T> {
        let shared = &*self.shared;
        unsafe {
            let oldest_slot = shared.oldest.get();
            let mut oldest = *oldest_slot;

            // Step over the stub to the first real entry, if one is visible.
            if oldest == shared.stub {
                let next = (*oldest).next.load(Ordering::Acquire);
                if next.is_null() {
                    return None;
                }
                *oldest_slot = next;
                oldest = next;
            }

            let mut next = (*oldest).next.load(Ordering::Acquire);
            if next.is_null() {
                // The last visible entry. If it is not the newest, a
                // producer is mid-put and the entry is not yet safe to take.
                if shared.newest.load(Ordering::Acquire) != oldest {
                    return None;
                }
                // Re-enqueue the stub to close the chain behind the entry.
                shared.put_raw(shared.stub);
                next = (*oldest).next.load(Ordering::Acquire);
                if next.is_null() {
                    return None;
                }
            }

            *oldest_slot = next;
            // No other reference to the node remains; free it now.
            let node = Box::from_raw(oldest);
            debug_assert!(node.value.is_some(), "polled the stub node");
            node.value
        }
    }

    /// Whether no entry is currently retrievable.
    ///
    /// An entry whose producer was preempted mid-put does not count; this
    /// mirrors what [`poll`](Self::poll) would observe.
    pub fn is_empty(&self) -> bool {
        let shared = &*self.shared;
        unsafe {
            let oldest = *shared.oldest.get();
            if oldest != shared.stub {
                return false;
            }
            (*oldest).next.load(Ordering::Acquire).is_null()
        }
    }

    /// Whether the queue is empty and no put is in progress.
    ///
    /// Unlike [`is_empty`](Self::is_empty), a half-finished put makes the
    /// queue non-idle. Useful for shutdown checks.
    pub fn is_idle(&self) -> bool {
        let shared = &*self.shared;
        unsafe {
            let oldest = *shared.oldest.get();
            // Any entry other than the stub means work exists, retrievable
            // or not.
            if oldest != shared.stub {
                return false;
            }
            // Newest not pointing at the stub means an entry has been
            // exchanged in, even if its link is not yet published.
            shared.newest.load(Ordering::Acquire) == shared.stub
        }
    }
}

impl<T> fmt::Debug for FunnelConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunnelConsumer").finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
