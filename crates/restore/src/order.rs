//! Dependency ordering of entity types.
//!
//! The canonical list puts parents before children. Types present in a
//! snapshot but missing from the list keep their first-seen order and go
//! after every listed type.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct DependencyOrderer {
    canonical: Vec<String>,
}

impl DependencyOrderer {
    pub fn new(canonical: Vec<String>) -> Self {
        DependencyOrderer { canonical }
    }

    /// Restore order for the entity types in `present`.
    ///
    /// Stable and deterministic; duplicates in `present` are ignored.
    pub fn order<S: AsRef<str>>(&self, present: &[S]) -> Vec<String> {
        let present_set: BTreeSet<&str> = present.iter().map(AsRef::as_ref).collect();
        let mut ordered: Vec<String> = self
            .canonical
            .iter()
            .filter(|t| present_set.contains(t.as_str()))
            .cloned()
            .collect();

        let mut seen: BTreeSet<&str> = self.canonical.iter().map(String::as_str).collect();
        for t in present.iter().map(AsRef::as_ref) {
            if seen.insert(t) {
                ordered.push(t.to_string());
            }
        }
        ordered
    }

    /// Clearing order: children before parents.
    pub fn clear_order<S: AsRef<str>>(&self, present: &[S]) -> Vec<String> {
        let mut ordered = self.order(present);
        ordered.reverse();
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orderer() -> DependencyOrderer {
        DependencyOrderer::new(vec![
            "school.classroom".to_string(),
            "school.student".to_string(),
            "school.feedeposit".to_string(),
        ])
    }

    #[test]
    fn listed_types_follow_canonical_order() {
        assert_eq!(
            orderer().order(&["school.feedeposit", "school.classroom", "school.student"]),
            vec!["school.classroom", "school.student", "school.feedeposit"]
        );
    }

    #[test]
    fn unlisted_types_go_last_in_first_seen_order() {
        assert_eq!(
            orderer().order(&[
                "school.timetable",
                "school.student",
                "library.book",
                "school.timetable",
            ]),
            vec!["school.student", "school.timetable", "library.book"]
        );
    }

    #[test]
    fn clear_order_is_reversed() {
        assert_eq!(
            orderer().clear_order(&["school.classroom", "school.feedeposit", "library.book"]),
            vec!["library.book", "school.feedeposit", "school.classroom"]
        );
    }

    #[test]
    fn empty_input() {
        assert!(orderer().order::<&str>(&[]).is_empty());
    }
}
