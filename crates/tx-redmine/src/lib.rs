//! Tracker adapter for the Redmine time-entries API.
//!
//! `GET <base>/time_entries.json?key=..&project_id=..&spent_on=..&offset=..&limit=..`

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use tx_core::{
    domain::TimeEntry, errors::Error, ports::TrackerClient, workdate::format_date, Result,
};

const TIME_ENTRIES_PATH: &str = "time_entries.json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One page of `/time_entries.json`.
#[derive(Debug, Deserialize)]
pub struct TimeEntryPage {
    pub time_entries: Vec<TimeEntry>,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: usize,
}

#[derive(Clone, Debug)]
pub struct RedmineClient {
    base_url: Url,
    api_key: String,
    page_limit: u32,
    http: reqwest::Client,
}

impl RedmineClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, page_limit: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Transport(format!("http client build failed: {e}")))?;
        Ok(Self {
            base_url: normalize_base(base_url)?,
            api_key: api_key.into(),
            page_limit,
            http,
        })
    }

    /// URL of one page. The API key travels as the `key` query parameter.
    pub fn page_url(&self, date: NaiveDate, project_id: &str, offset: usize) -> Result<Url> {
        let mut url = self
            .base_url
            .join(TIME_ENTRIES_PATH)
            .map_err(|e| Error::Transport(format!("invalid tracker url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("project_id", project_id)
            .append_pair("spent_on", &format_date(date))
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &self.page_limit.to_string());
        Ok(url)
    }

    async fn fetch_page(&self, url: Url) -> Result<TimeEntryPage> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("tracker request failed: {}", e.without_url())))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("tracker body read failed: {}", e.without_url())))?;
        decode_page(&body)
    }
}

#[async_trait]
impl TrackerClient for RedmineClient {
    async fn fetch_entries(&self, date: NaiveDate, project_id: &str) -> Result<Vec<TimeEntry>> {
        collect_pages(project_id, self.page_limit, |offset| async move {
            self.fetch_page(self.page_url(date, project_id, offset)?).await
        })
        .await
    }
}

/// Walks the pages of one query. The offset is tracked here, never taken
/// from the response, and the walk stops on an empty page, on reaching
/// `total_count`, on a page echoing a different offset than requested, or
/// once more pages were read than `total_count` can account for.
async fn collect_pages<F, Fut>(
    project_id: &str,
    page_limit: u32,
    mut fetch: F,
) -> Result<Vec<TimeEntry>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<TimeEntryPage>>,
{
    let mut entries = Vec::new();
    let mut offset = 0usize;
    let mut pages = 0usize;
    let mut max_pages = None;

    loop {
        let page = fetch(offset).await?;
        pages += 1;
        let got = page.time_entries.len();
        debug!(
            project = project_id,
            offset,
            got,
            total = page.total_count,
            "time entries page"
        );

        if page.offset != offset {
            warn!(
                project = project_id,
                requested = offset,
                echoed = page.offset,
                "tracker ignored the page offset; stopping pagination"
            );
            break;
        }

        let max_pages = *max_pages
            .get_or_insert_with(|| page.total_count / page_limit.max(1) as usize + 1);
        entries.extend(page.time_entries);
        offset += got;

        if got == 0 || offset >= page.total_count {
            break;
        }
        if pages >= max_pages {
            warn!(
                project = project_id,
                pages,
                total = page.total_count,
                "tracker returned more pages than expected; stopping pagination"
            );
            break;
        }
    }

    Ok(entries)
}

pub fn decode_page(body: &[u8]) -> Result<TimeEntryPage> {
    serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
}

/// `Url::join` replaces the last path segment unless the base ends with `/`.
fn normalize_base(raw: &str) -> Result<Url> {
    let mut s = raw.trim().to_string();
    if !s.ends_with('/') {
        s.push('/');
    }
    Url::parse(&s).map_err(|e| Error::Config(format!("invalid tracker url {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "time_entries": [
            {
                "id": 11,
                "project": {"id": 91, "name": "Internal"},
                "issue": {"id": 5},
                "user": {"id": 7, "name": "Ann"},
                "activity": {"id": 9, "name": "Development"},
                "hours": 1.25,
                "comments": "fix bug",
                "spent_on": "2024-06-07",
                "created_on": "2024-06-07T10:00:00Z",
                "updated_on": "2024-06-07T10:00:00Z"
            }
        ],
        "total_count": 3,
        "offset": 0,
        "limit": 1
    }"#;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 7).unwrap()
    }

    #[test]
    fn builds_page_url_with_credentials_and_filters() {
        let c = RedmineClient::new("https://tracker.example.org/redmine", "secret", 100).unwrap();
        let url = c.page_url(date(), "91", 200).unwrap();

        assert_eq!(url.path(), "/redmine/time_entries.json");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("key".to_string(), "secret".to_string()),
                ("project_id".to_string(), "91".to_string()),
                ("spent_on".to_string(), "2024-06-07".to_string()),
                ("offset".to_string(), "200".to_string()),
                ("limit".to_string(), "100".to_string()),
            ]
        );
    }

    #[test]
    fn decodes_page() {
        let page = decode_page(PAGE.as_bytes()).unwrap();
        assert_eq!(page.time_entries.len(), 1);
        assert_eq!(page.time_entries[0].user.name, "Ann");
        assert_eq!(page.total_count, 3);
        assert_eq!(page.limit, 1);
    }

    /// A page of `count` copies of the sample entry.
    fn page(offset: usize, count: usize, total_count: usize) -> TimeEntryPage {
        let mut p = decode_page(PAGE.as_bytes()).unwrap();
        let entry = p.time_entries.remove(0);
        p.time_entries = vec![entry; count];
        p.offset = offset;
        p.total_count = total_count;
        p
    }

    #[tokio::test]
    async fn accumulates_entries_across_pages() {
        let mut requested = Vec::new();
        let entries = collect_pages("91", 1, |offset| {
            requested.push(offset);
            std::future::ready(Ok(page(offset, 1, 3)))
        })
        .await
        .unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(requested, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn server_ignoring_offset_does_not_loop() {
        let mut requests = 0;
        let entries = collect_pages("91", 1, |_| {
            requests += 1;
            std::future::ready(Ok(page(0, 1, 3)))
        })
        .await
        .unwrap();

        assert_eq!(requests, 2);
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn page_count_is_capped_by_total_count() {
        // Echoes the offset but keeps claiming more entries than it serves.
        let mut requests = 0;
        let entries = collect_pages("91", 100, |offset| {
            requests += 1;
            std::future::ready(Ok(page(offset, 1, 150)))
        })
        .await
        .unwrap();

        assert_eq!(requests, 2);
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn empty_page_ends_pagination() {
        let mut requested = Vec::new();
        let entries = collect_pages("91", 1, |offset| {
            requested.push(offset);
            let count = usize::from(offset == 0);
            std::future::ready(Ok(page(offset, count, 10)))
        })
        .await
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(requested, vec![0, 1]);
    }

    #[tokio::test]
    async fn page_error_aborts_the_walk() {
        let result = collect_pages("91", 1, |offset| {
            std::future::ready(if offset == 0 {
                Ok(page(0, 1, 3))
            } else {
                Err(Error::Status {
                    status: 502,
                    body: String::new(),
                })
            })
        })
        .await;

        assert!(matches!(result, Err(Error::Status { status: 502, .. })));
    }

    #[test]
    fn invalid_body_is_a_decode_error() {
        assert!(matches!(decode_page(b"<html>"), Err(Error::Decode(_))));
        assert!(matches!(
            decode_page(br#"{"total_count": 0}"#),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(RedmineClient::new("not a url", "k", 100).is_err());
    }
}
