//! Open-addressing hash table parameterized by an allocator.

use core::marker::PhantomData;
use core::mem::{self, MaybeUninit};

use super::Storage;
use crate::allocator::{RawAllocator, INVALID_HANDLE};
use crate::utils::{fnv1a, mem_zero};

/// Slot state: never produced by [`clamp_hash`], marks an empty bucket.
const FREE_HASH: u64 = 0;
/// Slot state: a removed entry that probes must walk through.
const TOMBSTONE_HASH: u64 = 1;
/// Smallest hash value an occupied bucket can carry.
const FIRST_VALID_HASH: u64 = 2;

/// Default FNV-1a hashing for common key types.
///
/// Integers hash their native-endian bytes; string types hash the character
/// contents, so two strings with equal text hash alike regardless of where
/// they live.
pub trait DefaultHash {
    /// 64-bit hash of the key.
    fn default_hash(&self) -> u64;
}

macro_rules! impl_default_hash_for_int {
    ($($ty:ty),* $(,)?) => {
        $(impl DefaultHash for $ty {
            fn default_hash(&self) -> u64 {
                fnv1a(&self.to_ne_bytes())
            }
        })*
    };
}

impl_default_hash_for_int!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

impl DefaultHash for &str {
    fn default_hash(&self) -> u64 {
        fnv1a(self.as_bytes())
    }
}

impl DefaultHash for String {
    fn default_hash(&self) -> u64 {
        fnv1a(self.as_bytes())
    }
}

impl DefaultHash for char {
    fn default_hash(&self) -> u64 {
        fnv1a(&(*self as u32).to_ne_bytes())
    }
}

/// Hashing and sizing policy for a [`HashTable`].
pub struct MapConfig<K> {
    /// Hash function from key to 64-bit hash.
    pub hash_fn: fn(&K) -> u64,
    /// Equality on keys.
    pub equal_fn: fn(&K, &K) -> bool,
    /// Occupancy ratio that triggers a rehash. Defaults to 0.8.
    pub load_factor: f32,
    /// Capacity multiplier on rehash, clamped to a power of two. Must be
    /// greater than 1. Defaults to 2.0.
    pub grow_factor: f32,
}

impl<K> Clone for MapConfig<K> {
    fn clone(&self) -> Self {
        Self {
            hash_fn: self.hash_fn,
            equal_fn: self.equal_fn,
            load_factor: self.load_factor,
            grow_factor: self.grow_factor,
        }
    }
}

impl<K: DefaultHash + PartialEq> Default for MapConfig<K> {
    fn default() -> Self {
        Self {
            hash_fn: |key| key.default_hash(),
            equal_fn: |a, b| a == b,
            load_factor: 0.8,
            grow_factor: 2.0,
        }
    }
}

/// A bucket of the table. Only `hash` is meaningful while the slot is free
/// or a tombstone; the key and value are live exactly when
/// `hash >= FIRST_VALID_HASH`. Storing the hash beside the pair doubles as
/// the slot state and lets probes reject mismatches without touching keys.
struct Bucket<K, V> {
    hash: u64,
    key: MaybeUninit<K>,
    value: MaybeUninit<V>,
}

/// Open-addressing hash map with linear probing and tombstones.
///
/// Capacity is always a power of two, so the home slot is `hash & (cap-1)`.
/// Inserts grow the table first whenever `count >= capacity * load_factor`,
/// which also guarantees every probe terminates on a free slot.
///
/// # Examples
///
/// ```rust
/// use ember_memory::prelude::*;
///
/// let mut table: HashTable<&str, u32, _> = HashTable::new(global());
/// table.put("linear", 1);
/// table.put("stack", 2);
///
/// assert_eq!(table.get(&"stack"), Some(&2));
/// assert!(table.remove(&"linear"));
/// assert_eq!(table.len(), 1);
/// ```
pub struct HashTable<'a, K, V, A: RawAllocator> {
    alloc: &'a A,
    data: Storage,
    capacity: u32,
    count: u32,
    config: MapConfig<K>,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K, V, A: RawAllocator> HashTable<'a, K, V, A> {
    /// Bucket count used when none is requested.
    pub const DEFAULT_INIT_CAPACITY: u32 = 32;

    /// Creates a table with the default configuration.
    pub fn new(alloc: &'a A) -> Self
    where
        K: DefaultHash + PartialEq,
    {
        Self::with_config(alloc, MapConfig::default())
    }

    /// Creates a table with an explicit configuration.
    pub fn with_config(alloc: &'a A, config: MapConfig<K>) -> Self {
        Self::with_capacity(Self::DEFAULT_INIT_CAPACITY, alloc, config)
    }

    /// Creates a table pre-sized for `prealloc` buckets (rounded up to a
    /// power of two).
    pub fn with_capacity(prealloc: u32, alloc: &'a A, config: MapConfig<K>) -> Self {
        assert!(config.grow_factor > 1.0, "grow factor must exceed 1");
        let capacity = prealloc.max(Self::DEFAULT_INIT_CAPACITY).next_power_of_two();

        let mut table = Self {
            alloc,
            data: Storage::Ptr(core::ptr::null_mut()),
            capacity: 0,
            count: 0,
            config,
            _marker: PhantomData,
        };
        table.data = table.alloc_buckets(capacity);
        table.capacity = capacity;
        table
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Whether the table holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current bucket-array capacity. Always a power of two.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Inserts `value` under `key`, overwriting the value of an existing
    /// entry with an equal key.
    pub fn put(&mut self, key: K, value: V) {
        self.maybe_grow();

        let hash = self.clamp_hash((self.config.hash_fn)(&key));
        let mask = self.capacity - 1;
        let mut index = (hash & u64::from(mask)) as u32;

        for _ in 0..self.capacity {
            // SAFETY: index is masked into the bucket array.
            let bucket = unsafe { &mut *self.bucket_at(index) };

            if bucket.hash < FIRST_VALID_HASH {
                bucket.hash = hash;
                bucket.key.write(key);
                bucket.value.write(value);
                self.count += 1;
                return;
            }
            // SAFETY: occupied bucket holds a live key.
            if bucket.hash == hash
                && (self.config.equal_fn)(&key, unsafe { bucket.key.assume_init_ref() })
            {
                // SAFETY: occupied bucket holds a live value.
                unsafe { bucket.value.assume_init_drop() };
                bucket.value.write(value);
                return;
            }

            index = (index + 1) & mask;
        }

        unreachable!("probe must terminate under the load-factor invariant");
    }

    /// [`put`](Self::put) without the growth check, for callers that have
    /// already reserved room and must not have the bucket array move.
    ///
    /// The load-factor invariant is the caller's responsibility here; in
    /// debug builds violating it traps.
    pub fn put_within_capacity(&mut self, key: K, value: V) {
        debug_assert!(
            self.count < (self.capacity as f32 * self.config.load_factor) as u32,
            "table has no room below the load factor"
        );

        let hash = self.clamp_hash((self.config.hash_fn)(&key));
        let mask = self.capacity - 1;
        let mut index = (hash & u64::from(mask)) as u32;

        for _ in 0..self.capacity {
            // SAFETY: index is masked into the bucket array.
            let bucket = unsafe { &mut *self.bucket_at(index) };

            if bucket.hash < FIRST_VALID_HASH {
                bucket.hash = hash;
                bucket.key.write(key);
                bucket.value.write(value);
                self.count += 1;
                return;
            }
            // SAFETY: occupied bucket holds a live key.
            if bucket.hash == hash
                && (self.config.equal_fn)(&key, unsafe { bucket.key.assume_init_ref() })
            {
                // SAFETY: occupied bucket holds a live value.
                unsafe { bucket.value.assume_init_drop() };
                bucket.value.write(value);
                return;
            }

            index = (index + 1) & mask;
        }

        unreachable!("probe must terminate while the load factor holds");
    }

    /// Inserts only when no entry with an equal key exists. Returns whether
    /// the insertion happened.
    pub fn put_if_empty(&mut self, key: K, value: V) -> bool {
        self.maybe_grow();

        let hash = self.clamp_hash((self.config.hash_fn)(&key));
        let mask = self.capacity - 1;
        let mut index = (hash & u64::from(mask)) as u32;

        for _ in 0..self.capacity {
            // SAFETY: index is masked into the bucket array.
            let bucket = unsafe { &mut *self.bucket_at(index) };

            if bucket.hash < FIRST_VALID_HASH {
                bucket.hash = hash;
                bucket.key.write(key);
                bucket.value.write(value);
                self.count += 1;
                return true;
            }
            // SAFETY: occupied bucket holds a live key.
            if bucket.hash == hash
                && (self.config.equal_fn)(&key, unsafe { bucket.key.assume_init_ref() })
            {
                return false;
            }

            index = (index + 1) & mask;
        }

        unreachable!("probe must terminate under the load-factor invariant");
    }

    /// Borrow of the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        let index = self.find_index(key)?;
        // SAFETY: find_index only returns occupied buckets.
        Some(unsafe { (*self.bucket_at(index)).value.assume_init_ref() })
    }

    /// Mutable borrow of the value stored under `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let index = self.find_index(key)?;
        // SAFETY: find_index only returns occupied buckets.
        Some(unsafe { (*self.bucket_at(index)).value.assume_init_mut() })
    }

    /// Whether the table holds an entry with an equal key.
    pub fn contains(&self, key: &K) -> bool {
        self.find_index(key).is_some()
    }

    /// Removes the entry under `key`, leaving a tombstone so later probes
    /// still walk through the slot. Returns whether an entry was removed.
    pub fn remove(&mut self, key: &K) -> bool {
        let Some(index) = self.find_index(key) else {
            return false;
        };

        // SAFETY: find_index only returns occupied buckets.
        unsafe {
            let bucket = &mut *self.bucket_at(index);
            bucket.key.assume_init_drop();
            bucket.value.assume_init_drop();
            bucket.hash = TOMBSTONE_HASH;
        }
        self.count -= 1;
        true
    }

    /// Grows the bucket array to hold at least `new_capacity` buckets.
    pub fn reserve(&mut self, new_capacity: u32) {
        let target = new_capacity.max(Self::DEFAULT_INIT_CAPACITY).next_power_of_two();
        if target > self.capacity {
            self.rehash(target);
        }
    }

    /// Removes every entry; capacity is retained and tombstones vanish.
    pub fn clear(&mut self) {
        for index in 0..self.capacity {
            // SAFETY: index is within the bucket array.
            let bucket = unsafe { &mut *self.bucket_at(index) };
            if bucket.hash >= FIRST_VALID_HASH {
                // SAFETY: occupied bucket holds live key and value.
                unsafe {
                    bucket.key.assume_init_drop();
                    bucket.value.assume_init_drop();
                }
            }
            bucket.hash = FREE_HASH;
        }
        self.count = 0;
    }

    /// Iterates over live entries in bucket-array order (unspecified
    /// relative to insertion).
    pub fn iter(&self) -> Iter<'_, 'a, K, V, A> {
        Iter { table: self, index: 0 }
    }

    fn clamp_hash(&self, hash: u64) -> u64 {
        // User hashes colliding with the reserved band are pushed up to the
        // first valid value.
        hash.max(FIRST_VALID_HASH)
    }

    fn buckets_ptr(&self) -> *mut Bucket<K, V> {
        match self.data {
            Storage::Ptr(ptr) => ptr.cast(),
            Storage::Handle(handle) => {
                if handle == INVALID_HANDLE {
                    core::ptr::null_mut()
                } else {
                    self.alloc.handle_to_ptr(handle).cast()
                }
            }
        }
    }

    /// # Safety
    ///
    /// `index` must be below `self.capacity`.
    unsafe fn bucket_at(&self, index: u32) -> *mut Bucket<K, V> {
        debug_assert!(index < self.capacity);
        // SAFETY: per the caller contract the index is in bounds.
        unsafe { self.buckets_ptr().add(index as usize) }
    }

    /// Allocates and zero-initializes a bucket array; zeroed hash fields
    /// mark every slot free.
    fn alloc_buckets(&self, capacity: u32) -> Storage {
        let byte_size = capacity as usize * mem::size_of::<Bucket<K, V>>();
        let align = mem::align_of::<Bucket<K, V>>();

        if A::USES_HANDLES {
            let handle = self.alloc.allocate_handle(byte_size, align);
            assert!(handle != INVALID_HANDLE, "allocator failed to serve {byte_size} bytes");
            // SAFETY: freshly allocated block of byte_size bytes.
            unsafe { mem_zero(self.alloc.handle_to_ptr(handle), byte_size) };
            Storage::Handle(handle)
        } else {
            let ptr = self.alloc.allocate(byte_size, align);
            assert!(!ptr.is_null(), "allocator failed to serve {byte_size} bytes");
            // SAFETY: freshly allocated block of byte_size bytes.
            unsafe { mem_zero(ptr, byte_size) };
            Storage::Ptr(ptr)
        }
    }

    fn find_index(&self, key: &K) -> Option<u32> {
        if self.count == 0 {
            return None;
        }

        let hash = self.clamp_hash((self.config.hash_fn)(key));
        let mask = self.capacity - 1;
        let mut index = (hash & u64::from(mask)) as u32;

        for _ in 0..self.capacity {
            // SAFETY: index is masked into the bucket array.
            let bucket = unsafe { &*self.bucket_at(index) };

            if bucket.hash == FREE_HASH {
                return None;
            }
            // SAFETY: occupied bucket holds a live key. Tombstones fall
            // through and keep probing.
            if bucket.hash == hash
                && (self.config.equal_fn)(key, unsafe { bucket.key.assume_init_ref() })
            {
                return Some(index);
            }

            index = (index + 1) & mask;
        }

        None
    }

    fn maybe_grow(&mut self) {
        let threshold = (self.capacity as f32 * self.config.load_factor) as u32;
        if self.count >= threshold {
            let target = ((self.capacity as f32 * self.config.grow_factor) as u32)
                .max(self.capacity + 1)
                .next_power_of_two();
            self.rehash(target);
        }
    }

    /// Moves every live entry into a fresh zeroed bucket array of
    /// `new_capacity` slots. Tombstones are discarded along the way.
    fn rehash(&mut self, new_capacity: u32) {
        debug_assert!(new_capacity.is_power_of_two());

        let old_capacity = self.capacity;
        let old_storage = self.data;

        // In handle mode this allocation may relocate the backing buffer,
        // so the old array is re-resolved through its handle afterwards.
        let new_storage = self.alloc_buckets(new_capacity);

        self.data = new_storage;
        self.capacity = new_capacity;
        self.count = 0;

        let old_ptr: *mut Bucket<K, V> = match old_storage {
            Storage::Ptr(ptr) => ptr.cast(),
            Storage::Handle(handle) => {
                if handle == INVALID_HANDLE {
                    core::ptr::null_mut()
                } else {
                    self.alloc.handle_to_ptr(handle).cast()
                }
            }
        };

        if !old_ptr.is_null() {
            for i in 0..old_capacity {
                // SAFETY: i is within the old bucket array.
                let bucket = unsafe { &mut *old_ptr.add(i as usize) };
                if bucket.hash < FIRST_VALID_HASH {
                    continue;
                }
                // SAFETY: occupied bucket; the pair is moved out exactly
                // once and the old array is freed without dropping.
                unsafe {
                    let hash = bucket.hash;
                    let key = bucket.key.assume_init_read();
                    let value = bucket.value.assume_init_read();
                    self.insert_rehashed(hash, key, value);
                }
            }

            match old_storage {
                // SAFETY: the old array is this table's storage, freed once.
                Storage::Ptr(ptr) => unsafe { self.alloc.free(ptr) },
                Storage::Handle(handle) => unsafe { self.alloc.free_handle(handle) },
            }
        }
    }

    /// Insert path for rehashing: keys are unique, so only a free slot is
    /// searched for; the stored hash is reused rather than recomputed.
    fn insert_rehashed(&mut self, hash: u64, key: K, value: V) {
        let mask = self.capacity - 1;
        let mut index = (hash & u64::from(mask)) as u32;

        loop {
            // SAFETY: index is masked into the bucket array.
            let bucket = unsafe { &mut *self.bucket_at(index) };
            if bucket.hash < FIRST_VALID_HASH {
                bucket.hash = hash;
                bucket.key.write(key);
                bucket.value.write(value);
                self.count += 1;
                return;
            }
            index = (index + 1) & mask;
        }
    }
}

impl<K, V, A: RawAllocator> Drop for HashTable<'_, K, V, A> {
    fn drop(&mut self) {
        if mem::needs_drop::<K>() || mem::needs_drop::<V>() {
            self.clear();
        }
        match self.data {
            Storage::Handle(handle) => {
                if handle != INVALID_HANDLE {
                    // SAFETY: handle is this table's live storage.
                    unsafe { self.alloc.free_handle(handle) };
                }
            }
            Storage::Ptr(ptr) => {
                if !ptr.is_null() {
                    // SAFETY: ptr is this table's live storage.
                    unsafe { self.alloc.free(ptr) };
                }
            }
        }
    }
}

/// Iterator over live `(&K, &V)` entries in bucket order.
pub struct Iter<'s, 'a, K, V, A: RawAllocator> {
    table: &'s HashTable<'a, K, V, A>,
    index: u32,
}

impl<'s, K, V, A: RawAllocator> Iterator for Iter<'s, '_, K, V, A> {
    type Item = (&'s K, &'s V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.table.capacity {
            let index = self.index;
            self.index += 1;
            // SAFETY: index is below capacity.
            let bucket = unsafe { &*self.table.bucket_at(index) };
            if bucket.hash >= FIRST_VALID_HASH {
                // SAFETY: occupied bucket holds a live pair.
                return Some(unsafe {
                    (bucket.key.assume_init_ref(), bucket.value.assume_init_ref())
                });
            }
        }
        None
    }
}

impl<'s, 'a, K, V, A: RawAllocator> IntoIterator for &'s HashTable<'a, K, V, A> {
    type Item = (&'s K, &'s V);
    type IntoIter = Iter<'s, 'a, K, V, A>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::global;

    #[test]
    fn insert_get_update() {
        let mut table: HashTable<u32, u32, _> = HashTable::new(global());
        table.put(1, 10);
        table.put(2, 20);
        assert_eq!(table.get(&1), Some(&10));

        table.put(1, 11);
        assert_eq!(table.get(&1), Some(&11));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn put_if_empty_does_not_update() {
        let mut table: HashTable<u32, u32, _> = HashTable::new(global());
        assert!(table.put_if_empty(7, 1));
        assert!(!table.put_if_empty(7, 2));
        assert_eq!(table.get(&7), Some(&1));
    }

    #[test]
    fn remove_leaves_probe_chains_intact() {
        let mut table: HashTable<u32, u32, _> = HashTable::new(global());
        for i in 0..20 {
            table.put(i, i * 2);
        }
        assert!(table.remove(&3));
        assert!(!table.remove(&3));
        assert_eq!(table.get(&3), None);
        // Every other key survives the tombstone.
        for i in (0..20).filter(|&i| i != 3) {
            assert_eq!(table.get(&i), Some(&(i * 2)));
        }
    }

    #[test]
    fn reserved_hash_values_are_clamped() {
        // A hash function that lands every key in the reserved band.
        let config = MapConfig::<u32> {
            hash_fn: |_| 0,
            equal_fn: |a, b| a == b,
            load_factor: 0.8,
            grow_factor: 2.0,
        };
        let mut table: HashTable<u32, &str, _> = HashTable::with_config(global(), config);
        table.put(1, "one");
        table.put(2, "two");
        assert_eq!(table.get(&1), Some(&"one"));
        assert_eq!(table.get(&2), Some(&"two"));
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut table: HashTable<u32, u32, _> = HashTable::new(global());
        table.put(3, 30);

        *table.get_mut(&3).expect("entry exists") += 1;
        assert_eq!(table.get(&3), Some(&31));
        assert_eq!(table.get_mut(&9), None);
    }

    #[test]
    fn iteration_visits_each_live_entry_once() {
        let mut table: HashTable<u32, u32, _> = HashTable::new(global());
        for i in 0..10 {
            table.put(i, i);
        }
        table.remove(&4);

        let mut seen: Vec<u32> = table.iter().map(|(k, _)| *k).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn put_within_capacity_never_moves_the_array() {
        let mut table: HashTable<u32, u32, _> = HashTable::new(global());
        table.reserve(64);
        let capacity = table.capacity();

        for i in 0..40 {
            table.put_within_capacity(i, i);
        }
        assert_eq!(table.capacity(), capacity);
        assert_eq!(table.len(), 40);
        assert_eq!(table.get(&17), Some(&17));

        // Update path leaves the count alone.
        table.put_within_capacity(17, 170);
        assert_eq!(table.len(), 40);
        assert_eq!(table.get(&17), Some(&170));
    }

    #[test]
    fn contains_tracks_membership() {
        let mut table: HashTable<u32, u32, _> = HashTable::new(global());
        assert!(!table.contains(&1));
        table.put(1, 1);
        assert!(table.contains(&1));
        table.remove(&1);
        assert!(!table.contains(&1));
    }

    #[test]
    fn reserve_rounds_to_a_power_of_two() {
        let mut table: HashTable<u32, u32, _> = HashTable::new(global());
        table.reserve(100);
        assert_eq!(table.capacity(), 128);

        // A smaller request leaves the table alone.
        table.reserve(10);
        assert_eq!(table.capacity(), 128);
    }

    #[test]
    fn string_keys_hash_by_contents() {
        let owned = String::from("ember");
        let table_key: &str = owned.as_str();
        let other: &str = "ember";
        assert_eq!(table_key.default_hash(), other.default_hash());
    }
}
