//! Lock-free free list for pooled connections.
//!
//! A Treiber stack whose nodes are reclaimed through `crossbeam::epoch`: a
//! popped node is only freed once no pinned thread can still be reading it,
//! so a head pointer can never be recycled under a concurrent CAS (no ABA).

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam::epoch::{self, Atomic, Owned};

pub(crate) struct FreeStack<T> {
    head: Atomic<Node<T>>,
}

struct Node<T> {
    /// Copy of the value's identity, readable while the value itself is
    /// being moved out by a concurrent pop.
    id: u64,
    value: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

impl<T> FreeStack<T> {
    pub(crate) fn new() -> Self {
        Self {
            head: Atomic::null(),
        }
    }

    pub(crate) fn push(&self, id: u64, value: T) {
        let mut node = Owned::new(Node {
            id,
            value: ManuallyDrop::new(value),
            next: Atomic::null(),
        });
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Relaxed, &guard);
            node.next.store(head, Relaxed);
            match self.head.compare_exchange(head, node, Release, Relaxed, &guard) {
                Ok(_) => return,
                Err(e) => node = e.new,
            }
        }
    }

    pub(crate) fn pop(&self) -> Option<T> {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Acquire, &guard);
            // SAFETY: `head` was loaded under `guard`, so the node cannot be
            // reclaimed while we look at it.
            let node = unsafe { head.as_ref() }?;
            let next = node.next.load(Relaxed, &guard);
            if self
                .head
                .compare_exchange(head, next, Relaxed, Relaxed, &guard)
                .is_ok()
            {
                // SAFETY: the successful CAS unlinked `head`; only this thread
                // moves the value out, and destruction is deferred until every
                // thread that may still hold `head` has unpinned.
                unsafe {
                    guard.defer_destroy(head);
                    return Some(ManuallyDrop::into_inner(ptr::read(&node.value)));
                }
            }
        }
    }

    /// Identities currently on the stack, top first. Only exact while no
    /// push or pop runs concurrently.
    pub(crate) fn ids(&self) -> Vec<u64> {
        let guard = epoch::pin();
        let mut ids = Vec::new();
        let mut cur = self.head.load(Acquire, &guard);
        // SAFETY: nodes reachable under `guard` stay allocated; only `id`
        // and `next` are read, never the value.
        while let Some(node) = unsafe { cur.as_ref() } {
            ids.push(node.id);
            cur = node.next.load(Acquire, &guard);
        }
        ids
    }

    pub(crate) fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.head.load(Acquire, &guard).is_null()
    }
}

impl<T> Drop for FreeStack<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}
