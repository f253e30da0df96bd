//! Session arena with per-inode buckets.
//!
//! Slots are addressed by generation-checked keys, so a handle to a
//! reclaimed session never reaches whatever reuses its slot. Every mutation
//! happens under the cache-wide registry mutex.

/// Stable handle to a registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SessionKey {
    index: u32,
    generation: u32,
}

/// Bookkeeping of one session, guarded by the registry mutex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionState {
    pub inode: u32,
    pub staleness: u8,
    pub valid: bool,
    pub locked: bool,
    pub waiters: u32,
}

impl SessionState {
    fn new(inode: u32) -> Self {
        Self {
            inode,
            staleness: 0,
            valid: true,
            locked: false,
            waiters: 0,
        }
    }
}

pub(crate) struct Entry<T> {
    pub state: SessionState,
    pub resources: T,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

pub(crate) struct Registry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    buckets: Vec<Vec<SessionKey>>,
    bucket_mask: u32,
    live: usize,
    /// Set once by shutdown; the sweep task exits when it sees it.
    pub terminate: bool,
}

impl<T> Registry<T> {
    pub fn new(bucket_bits: u8) -> Self {
        let count = 1usize << bucket_bits;
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            buckets: (0..count).map(|_| Vec::new()).collect(),
            bucket_mask: (count - 1) as u32,
            live: 0,
            terminate: false,
        }
    }

    fn bucket_of(&self, inode: u32) -> usize {
        (inode & self.bucket_mask) as usize
    }

    pub fn insert(&mut self, inode: u32, resources: T) -> SessionKey {
        let entry = Entry {
            state: SessionState::new(inode),
            resources,
        };
        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                SessionKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                SessionKey {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        let bucket = self.bucket_of(inode);
        self.buckets[bucket].push(key);
        self.live += 1;
        key
    }

    #[cfg(test)]
    pub fn get(&self, key: SessionKey) -> Option<&Entry<T>> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn get_mut(&mut self, key: SessionKey) -> Option<&mut Entry<T>> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Pins the staleness counter of every session of `inode` at
    /// `refresh_ticks`. Only the inode's bucket is scanned.
    pub fn mark_stale(&mut self, inode: u32, refresh_ticks: u8) -> usize {
        let bucket = self.bucket_of(inode);
        let mut marked = 0;
        for key in &self.buckets[bucket] {
            let Some(entry) = self.slots[key.index as usize].entry.as_mut() else {
                continue;
            };
            if entry.state.inode == inode {
                entry.state.staleness = refresh_ticks;
                marked += 1;
            }
        }
        marked
    }

    /// One sweep tick: ages every session and unlinks the ones that are
    /// invalid and unlocked. Locked sessions are never removed.
    pub fn sweep(&mut self, refresh_ticks: u8) -> Vec<T> {
        let mut reclaimed = Vec::new();
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            let Some(entry) = slot.entry.as_mut() else {
                continue;
            };
            if entry.state.staleness < refresh_ticks {
                entry.state.staleness += 1;
            }
            if entry.state.locked || entry.state.valid {
                continue;
            }
            let key = SessionKey {
                index: index as u32,
                generation: slot.generation,
            };
            if let Some(entry) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                let bucket = self.bucket_of(entry.state.inode);
                self.buckets[bucket].retain(|k| *k != key);
                self.free.push(index as u32);
                self.live -= 1;
                reclaimed.push(entry.resources);
            }
        }
        reclaimed
    }

    /// Removes every session regardless of its state.
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.live);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                drained.push(entry.resources);
            }
        }
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.live = 0;
        drained
    }

    pub fn len(&self) -> usize {
        self.live
    }

    #[cfg(test)]
    fn bucket_len(&self, inode: u32) -> usize {
        self.buckets[self.bucket_of(inode)].len()
    }
}
