//! A map of dense integer key to value, used as the node arena.

use std::marker::PhantomData;

pub trait Index: From<usize> {
    fn index(&self) -> usize;
}

/// A map of a dense integer key to value, implemented as a vector.
/// Keys are handed out by push() and are never invalidated, so they can be
/// used as edges between entries without any ownership between them.
pub struct DenseMap<K, V> {
    vec: Vec<V>,
    key_type: PhantomData<K>,
}

impl<K, V> Default for DenseMap<K, V> {
    fn default() -> Self {
        DenseMap {
            vec: Vec::default(),
            key_type: PhantomData,
        }
    }
}

impl<K: Index, V> std::ops::Index<K> for DenseMap<K, V> {
    type Output = V;

    fn index(&self, k: K) -> &Self::Output {
        &self.vec[k.index()]
    }
}

impl<K: Index, V> std::ops::IndexMut<K> for DenseMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut Self::Output {
        &mut self.vec[k.index()]
    }
}

impl<K: Index, V> DenseMap<K, V> {
    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }

    pub fn push(&mut self, val: V) -> K {
        let id = K::from(self.vec.len());
        self.vec.push(val);
        id
    }

    pub fn all_ids(&self) -> impl Iterator<Item = K> {
        (0..self.vec.len()).map(K::from)
    }
}
