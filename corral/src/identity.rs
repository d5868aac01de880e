//! Identity validation.
//!
//! A command runs under a uid/gid plus a list of supplementary group
//! mappings. Each mapping is a contiguous range translation, and ranges must
//! be pairwise disjoint in both id spaces so that no mapping can leak its
//! host group into another one.

use corral_shared::{GroupMapping, IdSpace, IdentityError};
use serde::Serialize;

/// Identity requested by a caller. Not trusted until validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    pub group_mappings: Vec<GroupMapping>,
}

impl Identity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            group_mappings: Vec::new(),
        }
    }

    /// Append a single mapping.
    pub fn group_mapping(mut self, mapping: GroupMapping) -> Self {
        self.group_mappings.push(mapping);
        self
    }

    /// Append several mappings, keeping their order.
    pub fn group_mappings<I>(mut self, mappings: I) -> Self
    where
        I: IntoIterator<Item = GroupMapping>,
    {
        self.group_mappings.extend(mappings);
        self
    }

    pub fn validate(&self) -> Result<ValidatedIdentity, IdentityError> {
        IdentityMapper::validate(self.uid, self.gid, &self.group_mappings)
    }
}

/// Identity that passed [`IdentityMapper::validate`].
///
/// Can only be obtained through validation, so holding one proves the
/// mappings are well formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedIdentity {
    uid: u32,
    gid: u32,
    group_mappings: Vec<GroupMapping>,
}

impl ValidatedIdentity {
    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn group_mappings(&self) -> &[GroupMapping] {
        &self.group_mappings
    }

    /// Translate a container group id to its host id, if mapped.
    pub fn host_gid_for(&self, container_gid: u32) -> Option<u32> {
        self.group_mappings.iter().find_map(|m| {
            let offset = container_gid.checked_sub(m.container_id)?;
            (offset < m.size).then(|| m.host_id + offset)
        })
    }
}

/// Validates and normalizes identities before they reach the service.
pub struct IdentityMapper;

impl IdentityMapper {
    /// Check every mapping and return the identity in validated form.
    ///
    /// Rejects empty ranges, ranges running past `u32::MAX`, and any pair of
    /// mappings whose container ranges or host ranges overlap. Overlap uses
    /// half-open intervals: `[a, a+n)` and `[b, b+m)` overlap iff
    /// `a < b+m && b < a+n`.
    pub fn validate(
        uid: u32,
        gid: u32,
        group_mappings: &[GroupMapping],
    ) -> Result<ValidatedIdentity, IdentityError> {
        for (index, mapping) in group_mappings.iter().enumerate() {
            if mapping.size == 0 {
                return Err(IdentityError::EmptyRange { index });
            }
            let limit = u64::from(u32::MAX) + 1;
            if mapping.container_end() > limit || mapping.host_end() > limit {
                return Err(IdentityError::RangeOverflow { index });
            }
        }

        Self::check_disjoint(group_mappings, IdSpace::Container)?;
        Self::check_disjoint(group_mappings, IdSpace::Host)?;

        tracing::trace!(uid, gid, mappings = group_mappings.len(), "Identity validated");

        Ok(ValidatedIdentity {
            uid,
            gid,
            group_mappings: group_mappings.to_vec(),
        })
    }

    /// Sort ranges by start and compare neighbours. If any two ranges
    /// overlap, some adjacent pair in start order does too.
    fn check_disjoint(mappings: &[GroupMapping], space: IdSpace) -> Result<(), IdentityError> {
        let bounds = |m: &GroupMapping| match space {
            IdSpace::Container => (u64::from(m.container_id), m.container_end()),
            IdSpace::Host => (u64::from(m.host_id), m.host_end()),
        };

        let mut order: Vec<usize> = (0..mappings.len()).collect();
        order.sort_by_key(|&i| bounds(&mappings[i]));

        for pair in order.windows(2) {
            let (a_start, a_end) = bounds(&mappings[pair[0]]);
            let (b_start, b_end) = bounds(&mappings[pair[1]]);
            if ranges_overlap(a_start, a_end, b_start, b_end) {
                let (first, second) = if pair[0] < pair[1] {
                    (pair[0], pair[1])
                } else {
                    (pair[1], pair[0])
                };
                return Err(IdentityError::OverlappingRange {
                    space,
                    first: mappings[first],
                    second: mappings[second],
                });
            }
        }
        Ok(())
    }
}

fn ranges_overlap(a_start: u64, a_end: u64, b_start: u64, b_end: u64) -> bool {
    a_start < b_end && b_start < a_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Supplementary groups of a default Ubuntu user.
    fn ubuntu_groups() -> Vec<GroupMapping> {
        [4, 20, 24, 25, 27, 29, 30, 44, 46, 119, 120]
            .into_iter()
            .map(GroupMapping::identity)
            .collect()
    }

    #[test]
    fn test_disjoint_single_id_mappings_validate() {
        let identity = Identity::new(1000, 1000).group_mappings(ubuntu_groups());
        let validated = identity.validate().unwrap();
        assert_eq!(validated.uid(), 1000);
        assert_eq!(validated.gid(), 1000);
        assert_eq!(validated.group_mappings().len(), 11);
    }

    #[test]
    fn test_no_mappings_is_valid() {
        assert!(IdentityMapper::validate(0, 0, &[]).is_ok());
    }

    #[test]
    fn test_overlapping_container_ranges_rejected() {
        let a = GroupMapping::new(4, 4, 1);
        let b = GroupMapping::new(4, 10, 2);
        let err = IdentityMapper::validate(1000, 1000, &[a, b]).unwrap_err();
        assert_eq!(
            err,
            IdentityError::OverlappingRange {
                space: IdSpace::Container,
                first: a,
                second: b,
            }
        );
    }

    #[test]
    fn test_overlapping_host_ranges_rejected() {
        // Container ids differ, but both land on the host sudo group.
        let a = GroupMapping::new(100, 27, 1);
        let b = GroupMapping::new(27, 27, 1);
        let err = IdentityMapper::validate(1000, 1000, &[a, b]).unwrap_err();
        assert!(matches!(
            err,
            IdentityError::OverlappingRange {
                space: IdSpace::Host,
                ..
            }
        ));
    }

    #[test]
    fn test_adjacent_ranges_do_not_overlap() {
        let a = GroupMapping::new(10, 100, 5);
        let b = GroupMapping::new(15, 105, 5);
        assert!(IdentityMapper::validate(0, 0, &[a, b]).is_ok());
    }

    #[test]
    fn test_offending_pair_keeps_request_order() {
        let mappings = [
            GroupMapping::new(50, 500, 10),
            GroupMapping::new(0, 0, 1),
            GroupMapping::new(45, 400, 6),
        ];
        let err = IdentityMapper::validate(0, 0, &mappings).unwrap_err();
        assert_eq!(err.offending_pair(), Some((&mappings[0], &mappings[2])));
    }

    #[test]
    fn test_empty_range_rejected() {
        let mappings = [GroupMapping::identity(4), GroupMapping::new(20, 20, 0)];
        let err = IdentityMapper::validate(0, 0, &mappings).unwrap_err();
        assert_eq!(err, IdentityError::EmptyRange { index: 1 });
    }

    #[test]
    fn test_range_overflow_rejected() {
        let err =
            IdentityMapper::validate(0, 0, &[GroupMapping::new(u32::MAX, 0, 2)]).unwrap_err();
        assert_eq!(err, IdentityError::RangeOverflow { index: 0 });

        // Ending exactly at the top of the id space is fine.
        assert!(IdentityMapper::validate(0, 0, &[GroupMapping::new(u32::MAX, 0, 1)]).is_ok());
    }

    #[test]
    fn test_host_gid_lookup() {
        let validated = Identity::new(0, 0)
            .group_mapping(GroupMapping::new(1000, 200_000, 10))
            .validate()
            .unwrap();
        assert_eq!(validated.host_gid_for(1003), Some(200_003));
        assert_eq!(validated.host_gid_for(1010), None);
        assert_eq!(validated.host_gid_for(5), None);
    }

    fn disjoint_mappings() -> impl Strategy<Value = Vec<GroupMapping>> {
        // Each mapping owns a private 1000-id slot in both spaces; host slots
        // are a permutation of container slots.
        (1usize..16)
            .prop_flat_map(|n| {
                (
                    proptest::collection::vec((0u32..500, 1u32..500), n),
                    Just((0..n as u32).collect::<Vec<_>>()).prop_shuffle(),
                )
            })
            .prop_map(|(ranges, host_slots)| {
                ranges
                    .into_iter()
                    .zip(host_slots)
                    .enumerate()
                    .map(|(slot, ((offset, size), host_slot))| {
                        GroupMapping::new(
                            slot as u32 * 1000 + offset,
                            host_slot * 1000 + offset,
                            size,
                        )
                    })
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn prop_disjoint_ranges_always_validate(mappings in disjoint_mappings()) {
            prop_assert!(IdentityMapper::validate(1000, 1000, &mappings).is_ok());
        }

        #[test]
        fn prop_shared_container_id_always_rejected(
            mappings in disjoint_mappings(),
            pick in any::<prop::sample::Index>(),
            host in 900_000u32..1_000_000,
            size in 1u32..10,
        ) {
            let mut mappings = mappings;
            let victim = mappings[pick.index(mappings.len())];
            mappings.push(GroupMapping::new(victim.container_id, host, size));
            let err = IdentityMapper::validate(0, 0, &mappings).unwrap_err();
            let is_container_overlap = matches!(
                err,
                IdentityError::OverlappingRange { space: IdSpace::Container, .. }
            );
            prop_assert!(is_container_overlap);
        }
    }
}
