//! The export pipeline: fetch, aggregate, deliver, per exported project.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::{
    config::ProjectConfig,
    digest,
    ports::{ChannelDispatcher, TrackerClient},
    workdate::format_date,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProjectStatus {
    /// Entries were fetched; counts of digests delivered and failed.
    Exported { delivered: usize, failed: usize },
    /// The tracker fetch failed; nothing was sent for this project.
    FetchFailed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectOutcome {
    pub project_id: String,
    pub project_name: String,
    pub status: ProjectStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportReport {
    pub date: NaiveDate,
    pub is_test: bool,
    pub projects: Vec<ProjectOutcome>,
}

impl ExportReport {
    pub fn delivered(&self) -> usize {
        self.projects
            .iter()
            .map(|p| match p.status {
                ProjectStatus::Exported { delivered, .. } => delivered,
                ProjectStatus::FetchFailed(_) => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.projects
            .iter()
            .map(|p| match p.status {
                ProjectStatus::Exported { failed, .. } => failed,
                ProjectStatus::FetchFailed(_) => 1,
            })
            .sum()
    }
}

/// Runs exports for the configured projects.
///
/// Shared by the conversational flow and the scheduler.
pub struct Exporter {
    projects: Vec<ProjectConfig>,
    tracker: Arc<dyn TrackerClient>,
    dispatcher: Arc<dyn ChannelDispatcher>,
}

impl Exporter {
    pub fn new(
        projects: Vec<ProjectConfig>,
        tracker: Arc<dyn TrackerClient>,
        dispatcher: Arc<dyn ChannelDispatcher>,
    ) -> Self {
        Self {
            projects,
            tracker,
            dispatcher,
        }
    }

    /// Names of the projects an export would cover.
    pub fn exported_project_names(&self) -> Vec<String> {
        self.exported().map(|p| p.name.clone()).collect()
    }

    fn exported(&self) -> impl Iterator<Item = &ProjectConfig> {
        self.projects.iter().filter(|p| p.export)
    }

    /// Export every project with `export = true`. Never fails as a whole:
    /// fetch failures skip the project, delivery failures skip the digest.
    pub async fn run(&self, date: NaiveDate, is_test: bool) -> ExportReport {
        let day = format_date(date);
        info!(date = %day, is_test, "export started");

        let mut outcomes = Vec::new();
        for project in self.exported() {
            let status = self.export_project(project, date, &day, is_test).await;
            outcomes.push(ProjectOutcome {
                project_id: project.id.clone(),
                project_name: project.name.clone(),
                status,
            });
        }

        let report = ExportReport {
            date,
            is_test,
            projects: outcomes,
        };
        info!(
            date = %day,
            projects = report.projects.len(),
            delivered = report.delivered(),
            failures = report.failures(),
            "export finished"
        );
        report
    }

    async fn export_project(
        &self,
        project: &ProjectConfig,
        date: NaiveDate,
        day: &str,
        is_test: bool,
    ) -> ProjectStatus {
        let destination = project.destination(is_test);

        let entries = match self.tracker.fetch_entries(date, &project.id).await {
            Ok(v) => v,
            Err(e) => {
                warn!(project = %project.id, date = %day, error = %e, "fetch failed, skipping project");
                return ProjectStatus::FetchFailed(e.to_string());
            }
        };

        let digest = digest::aggregate(&entries, project.tracker_label());
        info!(
            project = %project.id,
            date = %day,
            entries = entries.len(),
            contributors = digest.len(),
            "entries fetched"
        );

        let mut delivered = 0usize;
        let mut failed = 0usize;
        for item in digest {
            match self.dispatcher.send(destination, &item.body).await {
                Ok(()) => {
                    delivered += 1;
                    info!(
                        project = %project.id,
                        contributor = %item.contributor_name,
                        destination = %destination,
                        "digest sent"
                    );
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        project = %project.id,
                        contributor = %item.contributor_name,
                        destination = %destination,
                        error = %e,
                        "digest delivery failed"
                    );
                }
            }
        }

        ProjectStatus::Exported { delivered, failed }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::digest::tests::entry;
    use crate::domain::{Destination, TimeEntry};
    use crate::errors::Error;
    use crate::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct FakeTracker {
        pub(crate) entries: HashMap<String, Vec<TimeEntry>>,
        pub(crate) failing: Vec<String>,
        pub(crate) calls: Mutex<Vec<(NaiveDate, String)>>,
    }

    impl FakeTracker {
        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub(crate) fn called_projects(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, p)| p.clone())
                .collect()
        }
    }

    #[async_trait]
    impl TrackerClient for FakeTracker {
        async fn fetch_entries(&self, date: NaiveDate, project_id: &str) -> Result<Vec<TimeEntry>> {
            self.calls
                .lock()
                .unwrap()
                .push((date, project_id.to_string()));
            if self.failing.iter().any(|p| p == project_id) {
                return Err(Error::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(self.entries.get(project_id).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeDispatcher {
        pub(crate) sent: Mutex<Vec<(Destination, String)>>,
        /// Bodies containing this substring fail to deliver.
        pub(crate) fail_on: Option<String>,
    }

    impl FakeDispatcher {
        pub(crate) fn send_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChannelDispatcher for FakeDispatcher {
        async fn send(&self, destination: &Destination, text: &str) -> Result<()> {
            if let Some(needle) = &self.fail_on {
                if text.contains(needle.as_str()) {
                    return Err(Error::Delivery("chat not found".to_string()));
                }
            }
            self.sent
                .lock()
                .unwrap()
                .push((destination.clone(), text.to_string()));
            Ok(())
        }
    }

    pub(crate) fn project(id: &str, export: bool) -> ProjectConfig {
        ProjectConfig {
            id: id.to_string(),
            name: format!("Project {id}"),
            chat_id: Destination::Channel(format!("@prod_{id}")),
            test_chat_id: Destination::Channel(format!("@test_{id}")),
            tracker: None,
            export,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 7).unwrap()
    }

    #[tokio::test]
    async fn fetches_only_exported_projects() {
        let tracker = Arc::new(FakeTracker::default());
        let dispatcher = Arc::new(FakeDispatcher::default());
        let exporter = Exporter::new(
            vec![project("a", false), project("b", true), project("c", false), project("d", true)],
            tracker.clone(),
            dispatcher.clone(),
        );

        let report = exporter.run(date(), false).await;

        assert_eq!(tracker.called_projects(), vec!["b", "d"]);
        assert_eq!(report.projects.len(), 2);
        assert_eq!(dispatcher.send_count(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_does_not_block_other_projects() {
        let mut tracker = FakeTracker::default();
        tracker.failing.push("a".to_string());
        tracker.entries.insert(
            "b".to_string(),
            vec![entry((1, "Ann"), Some(5), "fix"), entry((2, "Bob"), Some(6), "ship")],
        );
        let tracker = Arc::new(tracker);
        let dispatcher = Arc::new(FakeDispatcher::default());
        let exporter = Exporter::new(
            vec![project("a", true), project("b", true)],
            tracker.clone(),
            dispatcher.clone(),
        );

        let report = exporter.run(date(), false).await;

        assert!(matches!(
            report.projects[0].status,
            ProjectStatus::FetchFailed(_)
        ));
        assert_eq!(
            report.projects[1].status,
            ProjectStatus::Exported {
                delivered: 2,
                failed: 0
            }
        );
        let sent = dispatcher.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent
            .iter()
            .all(|(d, _)| *d == Destination::Channel("@prod_b".to_string())));
        assert_eq!(report.failures(), 1);
    }

    #[tokio::test]
    async fn delivery_failure_continues_with_next_contributor() {
        let mut tracker = FakeTracker::default();
        tracker.entries.insert(
            "a".to_string(),
            vec![
                entry((1, "Ann"), Some(5), "fix"),
                entry((2, "Bob"), Some(6), "ship"),
                entry((3, "Cid"), Some(7), "plan"),
            ],
        );
        let dispatcher = Arc::new(FakeDispatcher {
            fail_on: Some("Bob".to_string()),
            ..Default::default()
        });
        let exporter = Exporter::new(
            vec![project("a", true)],
            Arc::new(tracker),
            dispatcher.clone(),
        );

        let report = exporter.run(date(), false).await;

        assert_eq!(
            report.projects[0].status,
            ProjectStatus::Exported {
                delivered: 2,
                failed: 1
            }
        );
        assert_eq!(report.delivered(), 2);
        assert_eq!(dispatcher.send_count(), 2);
    }

    #[tokio::test]
    async fn test_mode_uses_test_channel() {
        let mut tracker = FakeTracker::default();
        tracker
            .entries
            .insert("a".to_string(), vec![entry((1, "Ann"), Some(5), "fix")]);
        let dispatcher = Arc::new(FakeDispatcher::default());
        let exporter = Exporter::new(
            vec![project("a", true)],
            Arc::new(tracker),
            dispatcher.clone(),
        );

        exporter.run(date(), true).await;

        let sent = dispatcher.sent.lock().unwrap();
        assert_eq!(sent[0].0, Destination::Channel("@test_a".to_string()));
    }

    #[tokio::test]
    async fn passes_target_date_to_tracker() {
        let tracker = Arc::new(FakeTracker::default());
        let exporter = Exporter::new(
            vec![project("a", true)],
            tracker.clone(),
            Arc::new(FakeDispatcher::default()),
        );

        exporter.run(date(), false).await;

        assert_eq!(tracker.calls.lock().unwrap()[0].0, date());
    }
}
