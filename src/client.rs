use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::model::{Section, Task};
use crate::settings::AppSettings;

pub const COMPLETED_PAGE_SIZE: usize = 200;
pub const RETENTION_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn error_for_status(self) -> Result<Self, ClientError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ClientError::Status {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Decodes a list response; an error status yields an empty list.
fn list_or_empty<T: DeserializeOwned>(
    response: HttpResponse,
    resource: &str,
) -> Result<Vec<T>, ClientError> {
    match response.error_for_status() {
        Ok(response) => Ok(serde_json::from_str(&response.body)?),
        Err(ClientError::Status { status, body }) => {
            warn!(status, %body, "{resource} request failed, treating as empty");
            Ok(Vec::new())
        }
        Err(other) => Err(other),
    }
}

/// Raw HTTP access to the Todoist API. Only transport failures are errors;
/// non-2xx statuses come back as a response.
pub trait HttpTransport: Send + Sync {
    fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, ClientError>;

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, ClientError>;
}

/// Where a fetch cycle gets its data from.
pub trait TaskSource: Send + Sync {
    fn list_sections(&self, project_id: &str) -> Result<Vec<Section>, ClientError>;
    fn list_active_tasks(&self, project_id: &str) -> Result<Vec<Task>, ClientError>;
    fn list_completed_tasks(&self, project_id: Option<&str>) -> Result<Vec<Task>, ClientError>;
}

pub struct ReqwestTransport {
    client: Client,
    token: String,
}

impl ReqwestTransport {
    pub fn new(token: &str) -> Result<Self, ClientError> {
        let client = Client::builder()
            .build()
            .map_err(|error| ClientError::Transport(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            client,
            token: token.trim().to_string(),
        })
    }

    fn finish(
        request: reqwest::blocking::RequestBuilder,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, ClientError> {
        let request = match timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        };
        let response = request
            .send()
            .map_err(|error| ClientError::Transport(error.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|error| ClientError::Transport(format!("failed reading response body: {error}")))?;
        Ok(HttpResponse { status, body })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, ClientError> {
        let request = self.client.get(url).query(query).bearer_auth(&self.token);
        Self::finish(request, timeout)
    }

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, ClientError> {
        let request = self.client.post(url).json(body).bearer_auth(&self.token);
        Self::finish(request, timeout)
    }
}

#[derive(Debug, Serialize)]
struct CompletedPageRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    limit: usize,
    offset: usize,
}

#[derive(Debug, Deserialize)]
struct CompletedPage {
    #[serde(default)]
    items: Vec<Value>,
}

pub struct TodoistClient<T: HttpTransport> {
    transport: T,
    rest_base_url: String,
    sync_base_url: String,
    timeout: Duration,
}

impl TodoistClient<ReqwestTransport> {
    pub fn from_settings(settings: &AppSettings) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(&settings.api_token)?;
        Ok(Self::new(transport, settings))
    }
}

impl<T: HttpTransport> TodoistClient<T> {
    pub fn new(transport: T, settings: &AppSettings) -> Self {
        Self {
            transport,
            rest_base_url: settings.rest_base_url.trim_end_matches('/').to_string(),
            sync_base_url: settings.sync_base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(settings.request_timeout_seconds),
        }
    }

    fn rest_url(&self, resource: &str) -> String {
        format!("{}/{resource}", self.rest_base_url)
    }

    /// Pages through completed items, keeping those inside the retention
    /// window relative to `now`.
    pub fn list_completed_tasks_at(
        &self,
        project_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<Task> {
        let url = format!("{}/completed/get_all", self.sync_base_url);
        let cutoff = now - ChronoDuration::days(RETENTION_DAYS);
        let mut kept = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = 0;

        loop {
            let request = CompletedPageRequest {
                project_id,
                limit: COMPLETED_PAGE_SIZE,
                offset,
            };
            let body = match serde_json::to_value(&request) {
                Ok(body) => body,
                Err(error) => {
                    warn!("failed to encode completed page request: {error}");
                    break;
                }
            };
            let response = match self
                .transport
                .post_json(&url, &body, Some(self.timeout))
                .and_then(HttpResponse::error_for_status)
            {
                Ok(response) => response,
                Err(error) => {
                    warn!(offset, kept = kept.len(), "completed tasks request failed: {error}");
                    break;
                }
            };
            let page: CompletedPage = match serde_json::from_str(&response.body) {
                Ok(page) => page,
                Err(error) => {
                    warn!(offset, "invalid completed tasks page: {error}");
                    break;
                }
            };

            let page_len = page.items.len();
            let mut fresh = 0;
            for item in page.items {
                let Ok(task) = serde_json::from_value::<Task>(item) else {
                    continue;
                };
                if !task.id.is_empty() && !seen.insert(task.id.clone()) {
                    continue;
                }
                fresh += 1;
                match task.completed_at_utc() {
                    Some(completed) if completed >= cutoff => kept.push(task),
                    Some(_) => {}
                    None => debug!(task = %task.id, "skipping completed task without a valid timestamp"),
                }
            }
            debug!(offset, page_len, kept = kept.len(), "fetched completed tasks page");

            if page_len < COMPLETED_PAGE_SIZE {
                break;
            }
            if fresh == 0 {
                warn!(offset, "completed tasks page repeated earlier items, stopping");
                break;
            }
            offset += COMPLETED_PAGE_SIZE;
        }

        kept
    }
}

impl<T: HttpTransport> TaskSource for TodoistClient<T> {
    fn list_sections(&self, project_id: &str) -> Result<Vec<Section>, ClientError> {
        let query = [("project_id", project_id.to_string())];
        let response = self.transport.get(&self.rest_url("sections"), &query, None)?;
        list_or_empty(response, "sections")
    }

    fn list_active_tasks(&self, project_id: &str) -> Result<Vec<Task>, ClientError> {
        let query = [("project_id", project_id.to_string())];
        let response = self
            .transport
            .get(&self.rest_url("tasks"), &query, Some(self.timeout))?;
        list_or_empty(response, "active tasks")
    }

    fn list_completed_tasks(&self, project_id: Option<&str>) -> Result<Vec<Task>, ClientError> {
        Ok(self.list_completed_tasks_at(project_id, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<HttpResponse, ClientError>>>,
        posts: Mutex<Vec<Value>>,
        gets: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl ScriptedTransport {
        fn push_json(&self, status: u16, body: Value) {
            self.replies.lock().unwrap().push_back(Ok(HttpResponse {
                status,
                body: body.to_string(),
            }));
        }

        fn push_transport_error(&self, message: &str) {
            self.replies
                .lock()
                .unwrap()
                .push_back(Err(ClientError::Transport(message.to_string())));
        }

        fn next_reply(&self) -> Result<HttpResponse, ClientError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Transport("no scripted reply".to_string())))
        }
    }

    impl HttpTransport for &ScriptedTransport {
        fn get(
            &self,
            url: &str,
            query: &[(&str, String)],
            _timeout: Option<Duration>,
        ) -> Result<HttpResponse, ClientError> {
            let query = query
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect();
            self.gets.lock().unwrap().push((url.to_string(), query));
            self.next_reply()
        }

        fn post_json(
            &self,
            _url: &str,
            body: &Value,
            _timeout: Option<Duration>,
        ) -> Result<HttpResponse, ClientError> {
            self.posts.lock().unwrap().push(body.clone());
            self.next_reply()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn item(id: usize, completed_at: DateTime<Utc>) -> Value {
        json!({
            "id": id.to_string(),
            "section_id": "s1",
            "completed_at": completed_at.to_rfc3339(),
        })
    }

    fn page(start: usize, len: usize, completed_at: DateTime<Utc>) -> Value {
        let items: Vec<Value> = (start..start + len).map(|id| item(id, completed_at)).collect();
        json!({ "items": items })
    }

    fn client(transport: &ScriptedTransport) -> TodoistClient<&ScriptedTransport> {
        TodoistClient::new(transport, &AppSettings::default())
    }

    #[test]
    fn pagination_stops_after_short_page() {
        let transport = ScriptedTransport::default();
        let recent = now() - ChronoDuration::days(3);
        transport.push_json(200, page(0, COMPLETED_PAGE_SIZE, recent));
        transport.push_json(200, page(200, COMPLETED_PAGE_SIZE, recent));
        transport.push_json(200, page(400, 17, recent));

        let tasks = client(&transport).list_completed_tasks_at(Some("p1"), now());

        let posts = transport.posts.lock().unwrap();
        assert_eq!(posts.len(), 3);
        let offsets: Vec<u64> = posts.iter().map(|body| body["offset"].as_u64().unwrap()).collect();
        assert_eq!(offsets, vec![0, 200, 400]);
        assert!(posts.iter().all(|body| body["limit"] == 200 && body["project_id"] == "p1"));
        assert_eq!(tasks.len(), 417);
        assert_eq!(tasks.last().map(|task| task.id.as_str()), Some("416"));
    }

    #[test]
    fn retention_window_boundary() {
        let transport = ScriptedTransport::default();
        let items = json!({
            "items": [
                item(1, now() - ChronoDuration::days(365) - ChronoDuration::seconds(1)),
                item(2, now() - ChronoDuration::days(364)),
                item(3, now() - ChronoDuration::days(365)),
            ]
        });
        transport.push_json(200, items);

        let tasks = client(&transport).list_completed_tasks_at(None, now());

        let ids: Vec<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
        let posts = transport.posts.lock().unwrap();
        assert!(posts[0].get("project_id").is_none());
    }

    #[test]
    fn malformed_timestamps_skip_only_that_item() {
        let transport = ScriptedTransport::default();
        transport.push_json(
            200,
            json!({
                "items": [
                    { "id": "1", "completed_at": "not a date" },
                    { "id": "2" },
                    { "id": "3", "completed_at": "2026-10-17T08:00:00Z" },
                ]
            }),
        );

        let tasks = client(&transport).list_completed_tasks_at(Some("p1"), now());

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "3");
    }

    #[test]
    fn error_status_keeps_accumulated_items() {
        let transport = ScriptedTransport::default();
        let recent = now() - ChronoDuration::days(1);
        transport.push_json(200, page(0, COMPLETED_PAGE_SIZE, recent));
        transport.push_json(503, json!({ "error": "unavailable" }));
        transport.push_json(200, page(400, 5, recent));

        let tasks = client(&transport).list_completed_tasks_at(Some("p1"), now());

        assert_eq!(tasks.len(), COMPLETED_PAGE_SIZE);
        assert_eq!(transport.posts.lock().unwrap().len(), 2);
    }

    #[test]
    fn transport_error_mid_pagination_keeps_accumulated_items() {
        let transport = ScriptedTransport::default();
        let recent = now() - ChronoDuration::days(1);
        transport.push_json(200, page(0, COMPLETED_PAGE_SIZE, recent));
        transport.push_transport_error("connection reset");
        transport.push_json(200, page(400, 5, recent));

        let tasks = client(&transport).list_completed_tasks_at(Some("p1"), now());

        assert_eq!(tasks.len(), COMPLETED_PAGE_SIZE);
        assert_eq!(transport.posts.lock().unwrap().len(), 2);
    }

    #[test]
    fn server_ignoring_offset_stops_pagination() {
        let transport = ScriptedTransport::default();
        let recent = now() - ChronoDuration::days(2);
        for _ in 0..5 {
            transport.push_json(200, page(0, COMPLETED_PAGE_SIZE, recent));
        }

        let tasks = client(&transport).list_completed_tasks_at(Some("p1"), now());

        assert_eq!(tasks.len(), COMPLETED_PAGE_SIZE);
        assert_eq!(transport.posts.lock().unwrap().len(), 2);
    }

    #[test]
    fn error_status_carries_response_body() {
        let response = HttpResponse {
            status: 404,
            body: "project not found".to_string(),
        };
        match response.error_for_status() {
            Err(ClientError::Status { status, body }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "project not found");
            }
            other => panic!("expected status error, got {other:?}"),
        }
        let ok = HttpResponse {
            status: 204,
            body: String::new(),
        };
        assert_eq!(ok.clone().error_for_status().ok(), Some(ok));
    }

    #[test]
    fn empty_and_expired_histories_yield_nothing() {
        let transport = ScriptedTransport::default();
        transport.push_json(200, json!({ "items": [] }));
        assert!(client(&transport).list_completed_tasks_at(Some("p1"), now()).is_empty());

        let transport = ScriptedTransport::default();
        transport.push_json(200, page(0, 3, now() - ChronoDuration::days(500)));
        assert!(client(&transport).list_completed_tasks_at(Some("p1"), now()).is_empty());
    }

    #[test]
    fn error_statuses_on_single_requests_mean_empty() {
        let transport = ScriptedTransport::default();
        transport.push_json(403, json!({}));
        transport.push_json(500, json!({}));
        let client = client(&transport);

        assert!(client.list_sections("p1").expect("sections").is_empty());
        assert!(client.list_active_tasks("p1").expect("active").is_empty());
    }

    #[test]
    fn sections_request_is_scoped_to_project() {
        let transport = ScriptedTransport::default();
        transport.push_json(
            200,
            json!([
                { "id": "10", "name": "Work", "project_id": "p1", "order": 1 },
                { "id": 11, "name": "Home" },
            ]),
        );

        let sections = client(&transport).list_sections("p1").expect("sections");

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].id, "11");
        let gets = transport.gets.lock().unwrap();
        assert!(gets[0].0.ends_with("/rest/v2/sections"));
        assert_eq!(gets[0].1, vec![("project_id".to_string(), "p1".to_string())]);
    }

    #[test]
    fn transport_failures_surface_as_errors() {
        let transport = ScriptedTransport::default();
        let result = client(&transport).list_active_tasks("p1");
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }
}
