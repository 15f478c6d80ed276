//! Shape merging
//!
//! Merging reconciles two divergent shapes of the same lineage into one
//! shape both can migrate to, which lets a polymorphic access site fold
//! sibling layouts back into a monomorphic one. The merged shape is built
//! by replaying the generalized property history through the transition
//! cache, so concurrent merges of the same pair converge on the identical
//! instance.

use crate::shape::Shape;
use std::sync::Arc;
use tracing::trace;

impl Shape {
    /// Try to merge `self` with `other` into a shape both can store.
    ///
    /// Succeeds only for related shapes (same root) that agree on shape
    /// flags, dynamic type and sharedness. When one side's properties are
    /// a subset already covered by the other's locations, the covering
    /// shape is returned by identity; otherwise both must carry the same
    /// keys in the same order with the same property flags, and each
    /// location is generalized pairwise. A pair of distinct constants
    /// makes the merge fail.
    ///
    /// Returns `None` when the shapes cannot be merged.
    pub fn try_merge(self: &Arc<Self>, other: &Arc<Shape>) -> Option<Arc<Shape>> {
        if Arc::ptr_eq(self, other) {
            return Some(Arc::clone(self));
        }
        if !self.is_related(other)
            || !self.dynamic_type().ptr_eq(other.dynamic_type())
            || self.flags() != other.flags()
            || self.is_shared() != other.is_shared()
        {
            return None;
        }

        let int_to_double = self.layout().allows_int_to_double();
        if covers(self, other, int_to_double) {
            return Some(Arc::clone(self));
        }
        if covers(other, self, int_to_double) {
            return Some(Arc::clone(other));
        }
        if self.property_count() != other.property_count() {
            return None;
        }
        let mut merged = Vec::with_capacity(self.property_count());
        for (a, b) in self.property_list().iter().zip(other.property_list().iter()) {
            if a.key() != b.key() || a.flags() != b.flags() {
                return None;
            }
            let spec = a
                .location()
                .spec()
                .generalize(&b.location().spec(), int_to_double)?;
            merged.push((a.key(), spec, a.flags()));
        }

        // Replay through the cache from the common root so that any two
        // threads merging this pair obtain the identical shape.
        let mut shape = self.lineage_root();
        if !shape.dynamic_type().ptr_eq(self.dynamic_type()) {
            shape = shape.change_type(self.dynamic_type().clone());
        }
        if shape.flags() != self.flags() {
            shape = shape
                .change_flags(self.flags() as u32)
                .unwrap_or_else(|_| unreachable!("flags came from an existing shape"));
        }
        for (key, spec, flags) in merged {
            shape = shape.append_transition(key, spec, flags, &|_| true);
        }
        if self.is_shared() {
            shape = shape.make_shared_shape();
        }
        trace!(
            left = self.id(),
            right = other.id(),
            merged = shape.id(),
            "merged shapes"
        );
        Some(shape)
    }

    /// Walk the parent chain up to the root shape
    fn lineage_root(self: &Arc<Self>) -> Arc<Shape> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent() {
            let parent = Arc::clone(parent);
            current = parent;
        }
        current
    }
}

/// Whether every property of `sub` is already storable through `sup`'s
/// corresponding location (same key and flags, `sup`'s spec is the
/// generalization of the pair)
fn covers(sup: &Arc<Shape>, sub: &Arc<Shape>, int_to_double: bool) -> bool {
    sub.property_list().iter().all(|p| {
        sup.get_property(p.key()).is_some_and(|q| {
            q.flags() == p.flags()
                && q.location()
                    .spec()
                    .generalize(&p.location().spec(), int_to_double)
                    .is_some_and(|g| g == q.location().spec())
        })
    })
}
