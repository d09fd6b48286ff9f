//! Per-contributor digests built from a flat list of time entries.

use std::collections::HashMap;

use crate::domain::TimeEntry;

/// One contributor's accumulated message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContributorDigest {
    pub contributor_id: i64,
    pub contributor_name: String,
    pub body: String,
}

/// Aggregation output for one (project, date) fetch.
///
/// Contributors keep the order in which the tracker first returned them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Digest {
    items: Vec<ContributorDigest>,
}

impl Digest {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, contributor_id: i64) -> Option<&str> {
        self.items
            .iter()
            .find(|d| d.contributor_id == contributor_id)
            .map(|d| d.body.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContributorDigest> {
        self.items.iter()
    }
}

impl IntoIterator for Digest {
    type Item = ContributorDigest;
    type IntoIter = std::vec::IntoIter<ContributorDigest>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Group `entries` by contributor.
///
/// The first entry of a contributor opens the message with date, name and
/// activity; later ones only add an issue line. Hours are not rendered.
pub fn aggregate(entries: &[TimeEntry], tracker_label: &str) -> Digest {
    let mut items: Vec<ContributorDigest> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for entry in entries {
        let line = issue_line(entry, tracker_label);
        match index.get(&entry.user.id) {
            Some(&pos) => {
                let body = &mut items[pos].body;
                body.push('\n');
                body.push_str(&line);
            }
            None => {
                index.insert(entry.user.id, items.len());
                items.push(ContributorDigest {
                    contributor_id: entry.user.id,
                    contributor_name: entry.user.name.clone(),
                    body: format!(
                        "{}\n{}\n{}\n{}",
                        entry.spent_on, entry.user.name, entry.activity.name, line
                    ),
                });
            }
        }
    }

    Digest { items }
}

fn issue_line(entry: &TimeEntry, tracker_label: &str) -> String {
    match entry.issue {
        Some(issue) => format!("{tracker_label} #{}: {}", issue.id, entry.comments),
        None => format!("{tracker_label}: {}", entry.comments),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{IdRef, NamedRef};

    pub(crate) fn entry(user: (i64, &str), issue: Option<i64>, comments: &str) -> TimeEntry {
        TimeEntry {
            id: 1,
            project: NamedRef {
                id: 91,
                name: "Internal".to_string(),
            },
            issue: issue.map(|id| IdRef { id }),
            user: NamedRef {
                id: user.0,
                name: user.1.to_string(),
            },
            activity: NamedRef {
                id: 9,
                name: "Development".to_string(),
            },
            hours: 2.0,
            comments: comments.to_string(),
            spent_on: "2024-06-07".to_string(),
            created_on: "2024-06-07".to_string(),
            updated_on: "2024-06-07".to_string(),
        }
    }

    #[test]
    fn empty_entries_produce_no_digests() {
        let d = aggregate(&[], "Internal");
        assert!(d.is_empty());
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn same_contributor_gets_header_then_continuation() {
        let entries = vec![
            entry((7, "Ann"), Some(5), "fix bug"),
            entry((7, "Ann"), Some(7), "add test"),
        ];
        let d = aggregate(&entries, "Internal");
        assert_eq!(d.len(), 1);

        let body = d.get(7).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(
            lines,
            vec![
                "2024-06-07",
                "Ann",
                "Development",
                "Internal #5: fix bug",
                "Internal #7: add test",
            ]
        );
        assert_eq!(body.matches("Ann").count(), 1);
        assert!(!lines[3].contains("#7"));
    }

    #[test]
    fn distinct_contributors_get_independent_digests() {
        let entries = vec![
            entry((7, "Ann"), Some(5), "fix bug"),
            entry((8, "Bob"), Some(6), "review"),
            entry((7, "Ann"), Some(7), "add test"),
            entry((8, "Bob"), Some(9), "deploy"),
        ];
        let d = aggregate(&entries, "Ops");
        assert_eq!(d.len(), 2);
        assert_eq!(
            d.get(7).unwrap(),
            "2024-06-07\nAnn\nDevelopment\nOps #5: fix bug\nOps #7: add test"
        );
        assert_eq!(
            d.get(8).unwrap(),
            "2024-06-07\nBob\nDevelopment\nOps #6: review\nOps #9: deploy"
        );

        let order: Vec<i64> = d.iter().map(|c| c.contributor_id).collect();
        assert_eq!(order, vec![7, 8]);
    }

    #[test]
    fn entries_without_issue_omit_the_reference() {
        let d = aggregate(&[entry((7, "Ann"), None, "standup")], "Internal");
        assert!(d.get(7).unwrap().ends_with("\nInternal: standup"));
    }

    #[test]
    fn hours_are_not_rendered() {
        let d = aggregate(&[entry((7, "Ann"), Some(5), "fix bug")], "Internal");
        assert!(!d.get(7).unwrap().contains("2.0"));
    }
}
