//! Per-slot scratch memory shared by every operator in a session.
//!
//! Each slot owns at most one backend workspace. A slot's workspace only
//! grows: asking for more than it holds frees the old buffer and allocates
//! exactly the requested size; asking for less reuses it.

use std::sync::{Arc, Mutex};

use convdnn_gpu::backend::{Backend, Workspace};
use log::debug;

use crate::error::{ConvError, Result};

/// Slots in an arena created with [`ScratchArena::new`].
pub const DEFAULT_NUM_SLOTS: usize = 4;

pub struct ScratchArena<B: Backend> {
    backend: Arc<B>,
    slots: Vec<Mutex<Option<B::Ws>>>,
}

impl<B: Backend> ScratchArena<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_slots(backend, DEFAULT_NUM_SLOTS)
    }

    pub fn with_slots(backend: Arc<B>, num_slots: usize) -> Self {
        Self {
            backend,
            slots: (0..num_slots).map(|_| Mutex::new(None)).collect(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Reject a slot id this arena does not have.
    pub fn check_slot(&self, slot: usize) -> Result<()> {
        if slot < self.slots.len() {
            Ok(())
        } else {
            Err(ConvError::Config(format!(
                "scratch slot {slot} out of range, arena has {} slots",
                self.slots.len()
            )))
        }
    }

    /// Run `f` with exclusive use of `slot`.
    ///
    /// Operators sharing a slot must not run concurrently; the lock makes
    /// that sound but callers are expected to never contend on it.
    pub fn with_slot<R>(
        &self,
        slot: usize,
        f: impl FnOnce(&mut ScratchSlot<'_, B>) -> Result<R>,
    ) -> Result<R> {
        self.check_slot(slot)?;
        let mut guard = self.slots[slot].lock().map_err(|_| ConvError::Poisoned)?;
        let mut scratch = ScratchSlot {
            backend: &*self.backend,
            id: slot,
            buf: &mut *guard,
        };
        f(&mut scratch)
    }

    /// Free the workspace held by `slot`.
    pub fn reset(&self, slot: usize) -> Result<()> {
        self.with_slot(slot, |s| {
            s.reset();
            Ok(())
        })
    }

    /// Bytes currently held by `slot`.
    pub fn capacity(&self, slot: usize) -> Result<usize> {
        self.with_slot(slot, |s| Ok(s.capacity()))
    }
}

/// Exclusive handle to one arena slot, the execution context of one call.
pub struct ScratchSlot<'a, B: Backend> {
    backend: &'a B,
    id: usize,
    buf: &'a mut Option<B::Ws>,
}

impl<'a, B: Backend> ScratchSlot<'a, B> {
    pub fn backend(&self) -> &'a B {
        self.backend
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// A workspace of at least `min_bytes`.
    ///
    /// On allocation failure the slot is left empty and the error returned.
    pub fn get(&mut self, min_bytes: usize) -> Result<&mut B::Ws> {
        let ws = match self.buf.take() {
            Some(ws) if ws.size_bytes() >= min_bytes => ws,
            old => {
                let old_bytes = old.as_ref().map_or(0, |ws| ws.size_bytes());
                drop(old);
                let ws = self.backend.alloc_workspace(min_bytes)?;
                debug!(
                    "scratch slot {}: grew {} -> {} bytes",
                    self.id, old_bytes, min_bytes
                );
                ws
            }
        };
        Ok(self.buf.insert(ws))
    }

    pub fn reset(&mut self) {
        *self.buf = None;
    }

    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, |ws| ws.size_bytes())
    }
}
