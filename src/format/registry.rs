//! Per-object format registry.
//!
//! Two tables: built-in entries mapping a format spec to the source flavor
//! that produces it, and arbitrary entries holding media stored by
//! `set_data`. Both feed one enumerable list kept in registration order.

use crate::medium::Medium;

use super::FormatSpec;

/// A format the object can produce from its content source.
#[derive(Debug, Clone)]
pub struct BuiltinEntry {
    pub flavor: String,
    pub spec: FormatSpec,
}

/// A format stored verbatim by the consumer.
#[derive(Debug, Clone)]
pub struct ArbitraryEntry {
    pub spec: FormatSpec,
    pub medium: Option<Medium>,
    /// Position of this entry's copy in the enumerable list.
    listed: usize,
}

/// Outcome of an arbitrary-entry lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitraryLookup {
    Found(usize),
    /// An entry with the same identity exists but offers none of the
    /// requested media.
    MediumMismatch,
    Absent,
}

/// Outcome of a built-in lookup.
#[derive(Debug, Clone, Copy)]
pub enum BuiltinMatch<'a> {
    Matched(&'a BuiltinEntry),
    /// Some entry has the requested id but no overlapping medium.
    MediumMismatch,
    NotFound,
}

/// Enumeration direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Get,
    Set,
}

#[derive(Debug, Default)]
pub struct FormatRegistry {
    builtin: Vec<BuiltinEntry>,
    arbitrary: Vec<ArbitraryEntry>,
    enumerable: Vec<FormatSpec>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `spec` to `flavor` and make it enumerable.
    pub fn register_builtin(&mut self, flavor: impl Into<String>, spec: FormatSpec) {
        self.builtin.push(BuiltinEntry {
            flavor: flavor.into(),
            spec,
        });
        self.enumerable.push(spec);
    }

    /// Find the arbitrary entry for `spec`, creating it when `upsert`.
    ///
    /// Identity is `(format, aspect, index)`. Without `upsert`, a found
    /// entry must also share a medium kind with the request. A created
    /// entry is enumerable immediately, before any medium is stored.
    pub fn lookup_arbitrary(&mut self, spec: &FormatSpec, upsert: bool) -> ArbitraryLookup {
        match self.find_arbitrary(spec) {
            ArbitraryLookup::Absent if upsert => {
                self.arbitrary.push(ArbitraryEntry {
                    spec: *spec,
                    medium: None,
                    listed: self.enumerable.len(),
                });
                self.enumerable.push(*spec);
                ArbitraryLookup::Found(self.arbitrary.len() - 1)
            }
            ArbitraryLookup::MediumMismatch if upsert => self
                .position_of(spec)
                .map_or(ArbitraryLookup::Absent, ArbitraryLookup::Found),
            other => other,
        }
    }

    /// Read-only variant of [`FormatRegistry::lookup_arbitrary`] without upsert.
    pub fn find_arbitrary(&self, spec: &FormatSpec) -> ArbitraryLookup {
        match self.position_of(spec) {
            Some(idx) if self.arbitrary[idx].spec.media.intersects(spec.media) => {
                ArbitraryLookup::Found(idx)
            }
            Some(_) => ArbitraryLookup::MediumMismatch,
            None => ArbitraryLookup::Absent,
        }
    }

    fn position_of(&self, spec: &FormatSpec) -> Option<usize> {
        self.arbitrary
            .iter()
            .position(|entry| entry.spec.same_identity(spec))
    }

    pub fn arbitrary(&self, idx: usize) -> Option<&ArbitraryEntry> {
        self.arbitrary.get(idx)
    }

    /// Replace the medium of entry `idx`, returning the previous one.
    ///
    /// The entry (and its enumerable copy) takes on the new medium's kind,
    /// so later lookups are matched against what is actually stored.
    pub fn store_medium(&mut self, idx: usize, medium: Medium) -> Option<Medium> {
        let entry = self.arbitrary.get_mut(idx)?;
        let previous = entry.medium.take();
        entry.spec.media = medium.kind();
        entry.medium = Some(medium);
        if let Some(listed) = self.enumerable.get_mut(entry.listed) {
            *listed = entry.spec;
        }
        previous
    }

    /// First built-in entry matching `spec` under the shell matching rule.
    pub fn match_builtin(&self, spec: &FormatSpec) -> BuiltinMatch<'_> {
        let mut same_id = false;
        for entry in &self.builtin {
            if spec.matches(&entry.spec) {
                return BuiltinMatch::Matched(entry);
            }
            if entry.spec.format == spec.format && spec.aspect.intersects(entry.spec.aspect) {
                same_id = true;
            }
        }
        if same_id {
            BuiltinMatch::MediumMismatch
        } else {
            BuiltinMatch::NotFound
        }
    }

    /// Enumerable specs in registration order. Only `Get` is supported.
    pub fn enumerate(&self, direction: Direction) -> Option<&[FormatSpec]> {
        match direction {
            Direction::Get => Some(&self.enumerable),
            Direction::Set => None,
        }
    }

    pub fn has_flavor(&self, flavor: &str) -> bool {
        self.builtin.iter().any(|entry| entry.flavor == flavor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{HDROP, MediumKinds, UNICODE_TEXT};
    use bytes::Bytes;

    fn memory(data: &'static [u8]) -> Medium {
        Medium::Memory(Bytes::from_static(data))
    }

    #[test]
    fn builtin_match_prefers_registration_order() {
        let mut reg = FormatRegistry::new();
        reg.register_builtin("text/plain", FormatSpec::new(UNICODE_TEXT, MediumKinds::MEMORY));
        reg.register_builtin("text/unicode", FormatSpec::new(UNICODE_TEXT, MediumKinds::MEMORY));

        let wanted = FormatSpec::new(UNICODE_TEXT, MediumKinds::MEMORY | MediumKinds::STREAM);
        match reg.match_builtin(&wanted) {
            BuiltinMatch::Matched(entry) => assert_eq!(entry.flavor, "text/plain"),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn builtin_medium_mismatch_is_distinct() {
        let mut reg = FormatRegistry::new();
        reg.register_builtin("application/x-moz-file", FormatSpec::new(HDROP, MediumKinds::MEMORY));

        let stream_only = FormatSpec::new(HDROP, MediumKinds::STREAM);
        assert!(matches!(reg.match_builtin(&stream_only), BuiltinMatch::MediumMismatch));
        let other = FormatSpec::new(7, MediumKinds::MEMORY);
        assert!(matches!(reg.match_builtin(&other), BuiltinMatch::NotFound));
    }

    #[test]
    fn upsert_creates_enumerable_entry_immediately() {
        let mut reg = FormatRegistry::new();
        let spec = FormatSpec::new(99, MediumKinds::MEMORY).with_index(0);
        assert_eq!(reg.lookup_arbitrary(&spec, false), ArbitraryLookup::Absent);

        let found = reg.lookup_arbitrary(&spec, true);
        assert_eq!(found, ArbitraryLookup::Found(0));
        assert_eq!(reg.enumerate(Direction::Get).unwrap(), &[spec]);
        assert!(reg.arbitrary(0).unwrap().medium.is_none());
    }

    #[test]
    fn arbitrary_lookup_requires_medium_overlap() {
        let mut reg = FormatRegistry::new();
        let spec = FormatSpec::new(99, MediumKinds::MEMORY).with_index(0);
        let ArbitraryLookup::Found(idx) = reg.lookup_arbitrary(&spec, true) else {
            panic!("upsert must create");
        };
        reg.store_medium(idx, memory(b"m1"));

        let as_stream = FormatSpec::new(99, MediumKinds::STREAM).with_index(0);
        assert_eq!(reg.find_arbitrary(&as_stream), ArbitraryLookup::MediumMismatch);
        assert_eq!(reg.lookup_arbitrary(&as_stream, true), ArbitraryLookup::Found(idx));

        let other_index = FormatSpec::new(99, MediumKinds::MEMORY).with_index(1);
        assert_eq!(reg.find_arbitrary(&other_index), ArbitraryLookup::Absent);
    }

    #[test]
    fn store_medium_returns_previous() {
        let mut reg = FormatRegistry::new();
        let spec = FormatSpec::new(99, MediumKinds::MEMORY).with_index(0);
        let ArbitraryLookup::Found(idx) = reg.lookup_arbitrary(&spec, true) else {
            panic!("upsert must create");
        };
        assert!(reg.store_medium(idx, memory(b"m1")).is_none());
        let previous = reg.store_medium(idx, memory(b"m2")).unwrap();
        assert_eq!(previous.read_all().unwrap(), b"m1");
    }

    #[test]
    fn store_medium_leaves_identical_builtin_listing_alone() {
        let mut reg = FormatRegistry::new();
        let spec = FormatSpec::new(UNICODE_TEXT, MediumKinds::MEMORY);
        reg.register_builtin("text/plain", spec);
        let ArbitraryLookup::Found(idx) = reg.lookup_arbitrary(&spec, true) else {
            panic!("upsert must create");
        };

        let region = crate::sync::SharedRegion::from_slice(b"xy");
        let queue = crate::sync::TaskQueue::new();
        reg.store_medium(
            idx,
            Medium::stream(crate::stream::SharedMemoryStream::new(region, 2, None, &queue)),
        );

        let listed = reg.enumerate(Direction::Get).unwrap();
        assert_eq!(listed[0], spec);
        assert_eq!(listed[1].media, MediumKinds::STREAM);
    }

    #[test]
    fn enumerate_set_direction_unsupported() {
        let reg = FormatRegistry::new();
        assert!(reg.enumerate(Direction::Set).is_none());
        assert!(reg.enumerate(Direction::Get).unwrap().is_empty());
    }
}
