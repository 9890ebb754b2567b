use std::collections::BTreeSet;

/// A possibly infinite set of subject ids of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectSet {
    Only(BTreeSet<String>),
    /// Every id except the listed ones.
    AllExcept(BTreeSet<String>),
}

impl SubjectSet {
    pub fn empty() -> Self {
        Self::Only(BTreeSet::new())
    }

    pub fn everyone() -> Self {
        Self::AllExcept(BTreeSet::new())
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            Self::Only(ids) => ids.contains(id),
            Self::AllExcept(ids) => !ids.contains(id),
        }
    }

    pub fn union(self, other: Self) -> Self {
        match (self, other) {
            (Self::Only(a), Self::Only(b)) => Self::Only(&a | &b),
            (Self::Only(a), Self::AllExcept(b)) | (Self::AllExcept(b), Self::Only(a)) => {
                Self::AllExcept(&b - &a)
            }
            (Self::AllExcept(a), Self::AllExcept(b)) => Self::AllExcept(&a & &b),
        }
    }

    pub fn intersection(self, other: Self) -> Self {
        match (self, other) {
            (Self::Only(a), Self::Only(b)) => Self::Only(&a & &b),
            (Self::Only(a), Self::AllExcept(b)) | (Self::AllExcept(b), Self::Only(a)) => {
                Self::Only(&a - &b)
            }
            (Self::AllExcept(a), Self::AllExcept(b)) => Self::AllExcept(&a | &b),
        }
    }

    pub fn difference(self, other: Self) -> Self {
        self.intersection(other.complement())
    }

    pub fn complement(self) -> Self {
        match self {
            Self::Only(ids) => Self::AllExcept(ids),
            Self::AllExcept(ids) => Self::Only(ids),
        }
    }
}

impl FromIterator<String> for SubjectSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self::Only(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(ids: &[&str]) -> SubjectSet {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn all_except(ids: &[&str]) -> SubjectSet {
        only(ids).complement()
    }

    #[test]
    fn union_of_finite_sets() {
        assert_eq!(only(&["a", "b"]).union(only(&["b", "c"])), only(&["a", "b", "c"]));
    }

    #[test]
    fn union_with_cofinite_set_drops_covered_exclusions() {
        assert_eq!(
            only(&["a"]).union(all_except(&["a", "b"])),
            all_except(&["b"])
        );
        assert_eq!(
            all_except(&["a", "b"]).union(all_except(&["b", "c"])),
            all_except(&["b"])
        );
    }

    #[test]
    fn intersection_cases() {
        assert_eq!(only(&["a", "b"]).intersection(only(&["b"])), only(&["b"]));
        assert_eq!(
            all_except(&["a"]).intersection(only(&["a", "b"])),
            only(&["b"])
        );
        assert_eq!(
            all_except(&["a"]).intersection(all_except(&["b"])),
            all_except(&["a", "b"])
        );
    }

    #[test]
    fn difference_from_everyone_excludes_subtrahend() {
        let set = SubjectSet::everyone().difference(only(&["alice"]));

        assert!(!set.contains("alice"));
        assert!(set.contains("bob"));
    }

    #[test]
    fn difference_of_cofinite_sets_is_finite() {
        assert_eq!(
            all_except(&["a"]).difference(all_except(&["a", "b"])),
            only(&["b"])
        );
    }

    #[test]
    fn empty_contains_nothing() {
        assert!(!SubjectSet::empty().contains("anyone"));
        assert!(SubjectSet::everyone().contains("anyone"));
    }
}
