use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use gitbot_core::{IssueTitle, RepositoryRef};
use gitbot_protocol::IssueStateFilter;
use reqwest::{header::ACCEPT, Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{core::MAX_LIST_PAGE_SIZE, metrics::record_ticket_service_failure};

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";
const GITHUB_API_VERSION_HEADER: &str = "x-github-api-version";
const GITHUB_API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("gitbot/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketState {
    Open,
    Closed,
}

impl TicketState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn matches(self, filter: IssueStateFilter) -> bool {
        match filter {
            IssueStateFilter::All => true,
            IssueStateFilter::Open => self == Self::Open,
            IssueStateFilter::Closed => self == Self::Closed,
        }
    }
}

/// A ticket as reported by the ticket service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub state: TicketState,
    /// RFC 3339.
    pub created_at: String,
    pub updated_at: String,
}

/// One page of a ticket listing. Pages start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub per_page: u8,
}

impl Page {
    #[must_use]
    pub fn first(per_page: u8) -> Self {
        Self {
            number: 1,
            per_page: per_page.clamp(1, MAX_LIST_PAGE_SIZE),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TicketError {
    #[error("ticket not found")]
    NotFound,
    #[error("ticket service answered with status {status}")]
    Status { status: u16 },
    #[error("ticket service unreachable: {0}")]
    Transport(String),
    #[error("ticket service response could not be decoded")]
    Decode,
}

/// Remote issue tracker. Implementations never retry.
#[async_trait]
pub trait TicketService: Send + Sync {
    async fn create_ticket(
        &self,
        repository: &RepositoryRef,
        title: &IssueTitle,
        body: &str,
    ) -> Result<Ticket, TicketError>;

    async fn get_ticket(
        &self,
        repository: &RepositoryRef,
        number: u64,
    ) -> Result<Ticket, TicketError>;

    async fn set_ticket_state(
        &self,
        repository: &RepositoryRef,
        number: u64,
        state: TicketState,
    ) -> Result<(), TicketError>;

    async fn add_ticket_comment(
        &self,
        repository: &RepositoryRef,
        number: u64,
        body: &str,
    ) -> Result<(), TicketError>;

    /// Newest first.
    async fn list_tickets(
        &self,
        repository: &RepositoryRef,
        state: IssueStateFilter,
        page: Page,
    ) -> Result<Vec<Ticket>, TicketError>;
}

/// GitHub REST issues API, authenticated with a pre-issued token.
#[derive(Clone)]
pub struct GitHubTickets {
    client: Client,
    api_url: String,
    token: String,
}

impl GitHubTickets {
    /// # Errors
    /// Returns an error if the token is blank or the HTTP client cannot be built.
    pub fn new(api_url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(anyhow!("github token cannot be empty"));
        }
        let api_url = api_url.trim().trim_end_matches('/');
        if !(api_url.starts_with("https://") || api_url.starts_with("http://")) {
            return Err(anyhow!("github api url must be an http(s) url"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_owned(),
            token: token.to_owned(),
        })
    }

    fn issues_url(&self, repository: &RepositoryRef) -> String {
        format!(
            "{}/repos/{}/{}/issues",
            self.api_url,
            repository.owner(),
            repository.name()
        )
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, TicketError> {
        let response = request
            .bearer_auth(&self.token)
            .header(ACCEPT, GITHUB_MEDIA_TYPE)
            .header(GITHUB_API_VERSION_HEADER, GITHUB_API_VERSION)
            .send()
            .await
            .map_err(|error| {
                record_ticket_service_failure(operation);
                tracing::warn!(
                    event = "tickets.request",
                    outcome = "transport_error",
                    operation,
                    error = %error
                );
                TicketError::Transport(error.to_string())
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(TicketError::NotFound);
        }
        if !status.is_success() {
            record_ticket_service_failure(operation);
            tracing::warn!(
                event = "tickets.request",
                outcome = "status_error",
                operation,
                status = status.as_u16()
            );
            return Err(TicketError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(
        operation: &'static str,
        response: Response,
    ) -> Result<T, TicketError> {
        response.json().await.map_err(|error| {
            record_ticket_service_failure(operation);
            tracing::warn!(
                event = "tickets.decode",
                outcome = "invalid_body",
                operation,
                error = %error
            );
            TicketError::Decode
        })
    }
}

#[derive(Debug, Deserialize)]
struct IssueWire {
    number: u64,
    title: String,
    html_url: String,
    state: String,
    created_at: String,
    updated_at: String,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl TryFrom<IssueWire> for Ticket {
    type Error = TicketError;

    fn try_from(value: IssueWire) -> Result<Self, Self::Error> {
        let state = match value.state.as_str() {
            "open" => TicketState::Open,
            "closed" => TicketState::Closed,
            _ => return Err(TicketError::Decode),
        };
        Ok(Self {
            number: value.number,
            title: value.title,
            url: value.html_url,
            state,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Serialize)]
struct CreateIssueRequest<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct UpdateIssueStateRequest {
    state: &'static str,
}

#[derive(Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

#[async_trait]
impl TicketService for GitHubTickets {
    async fn create_ticket(
        &self,
        repository: &RepositoryRef,
        title: &IssueTitle,
        body: &str,
    ) -> Result<Ticket, TicketError> {
        let request = self
            .client
            .post(self.issues_url(repository))
            .json(&CreateIssueRequest {
                title: title.as_str(),
                body,
            });
        let response = self.send("create", request).await?;
        Self::decode::<IssueWire>("create", response).await?.try_into()
    }

    async fn get_ticket(
        &self,
        repository: &RepositoryRef,
        number: u64,
    ) -> Result<Ticket, TicketError> {
        let request = self
            .client
            .get(format!("{}/{number}", self.issues_url(repository)));
        let response = self.send("get", request).await?;
        let issue = Self::decode::<IssueWire>("get", response).await?;
        if issue.pull_request.is_some() {
            return Err(TicketError::NotFound);
        }
        issue.try_into()
    }

    async fn set_ticket_state(
        &self,
        repository: &RepositoryRef,
        number: u64,
        state: TicketState,
    ) -> Result<(), TicketError> {
        let request = self
            .client
            .patch(format!("{}/{number}", self.issues_url(repository)))
            .json(&UpdateIssueStateRequest {
                state: state.as_str(),
            });
        self.send("set_state", request).await?;
        Ok(())
    }

    async fn add_ticket_comment(
        &self,
        repository: &RepositoryRef,
        number: u64,
        body: &str,
    ) -> Result<(), TicketError> {
        let request = self
            .client
            .post(format!("{}/{number}/comments", self.issues_url(repository)))
            .json(&CreateCommentRequest { body });
        self.send("comment", request).await?;
        Ok(())
    }

    async fn list_tickets(
        &self,
        repository: &RepositoryRef,
        state: IssueStateFilter,
        page: Page,
    ) -> Result<Vec<Ticket>, TicketError> {
        let url = format!(
            "{}?state={}&sort=created&direction=desc&per_page={}&page={}",
            self.issues_url(repository),
            state.as_str(),
            page.per_page,
            page.number
        );
        let response = self.send("list", self.client.get(url)).await?;
        Self::decode::<Vec<IssueWire>>("list", response)
            .await?
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(Ticket::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gitbot_core::{IssueTitle, RepositoryRef};
    use gitbot_protocol::IssueStateFilter;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::oneshot,
    };

    use super::{GitHubTickets, Page, TicketError, TicketService, TicketState};

    const ISSUE_JSON: &str = r#"{"number":42,"title":"Bug","html_url":"https://github.com/acme/app/issues/42","state":"open","created_at":"2024-05-01T10:00:00Z","updated_at":"2024-05-02T10:00:00Z"}"#;

    fn repo() -> RepositoryRef {
        RepositoryRef::try_from(String::from("acme/app")).unwrap()
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let read = stream.read(&mut chunk).await.unwrap();
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&buffer);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buffer.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    async fn spawn_github_stub(
        status: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, request_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let _ = request_tx.send(request);
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });
        (format!("http://127.0.0.1:{}", addr.port()), request_rx)
    }

    fn client(api_url: &str) -> GitHubTickets {
        GitHubTickets::new(api_url, "test-token", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn create_posts_title_and_body_with_token() {
        let (api_url, request_rx) = spawn_github_stub("201 Created", ISSUE_JSON).await;
        let title = IssueTitle::try_from(String::from("Bug")).unwrap();

        let ticket = client(&api_url)
            .create_ticket(&repo(), &title, "It crashes")
            .await
            .unwrap();
        assert_eq!(ticket.number, 42);
        assert_eq!(ticket.state, TicketState::Open);
        assert_eq!(ticket.url, "https://github.com/acme/app/issues/42");

        let request = request_rx.await.unwrap();
        assert!(request.starts_with("POST /repos/acme/app/issues HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer test-token"));
        assert!(request.contains(r#""title":"Bug""#));
        assert!(request.contains(r#""body":"It crashes""#));
    }

    #[tokio::test]
    async fn missing_ticket_maps_to_not_found() {
        let (api_url, _request_rx) =
            spawn_github_stub("404 Not Found", r#"{"message":"Not Found"}"#).await;
        let error = client(&api_url).get_ticket(&repo(), 7).await.unwrap_err();
        assert_eq!(error, TicketError::NotFound);
    }

    #[tokio::test]
    async fn server_errors_are_distinct_from_not_found() {
        let (api_url, _request_rx) =
            spawn_github_stub("502 Bad Gateway", r#"{"message":"upstream"}"#).await;
        let error = client(&api_url).get_ticket(&repo(), 7).await.unwrap_err();
        assert_eq!(error, TicketError::Status { status: 502 });
    }

    #[tokio::test]
    async fn pull_requests_are_not_tickets() {
        let body = r#"{"number":9,"title":"PR","html_url":"https://github.com/acme/app/pull/9","state":"open","created_at":"2024-05-01T10:00:00Z","updated_at":"2024-05-01T10:00:00Z","pull_request":{}}"#;
        let (api_url, _request_rx) = spawn_github_stub("200 OK", body).await;
        let error = client(&api_url).get_ticket(&repo(), 9).await.unwrap_err();
        assert_eq!(error, TicketError::NotFound);
    }

    #[tokio::test]
    async fn list_passes_filter_and_paging() {
        let body = r#"[
            {"number":2,"title":"Two","html_url":"https://github.com/acme/app/issues/2","state":"closed","created_at":"2024-05-02T10:00:00Z","updated_at":"2024-05-02T10:00:00Z"},
            {"number":1,"title":"One","html_url":"https://github.com/acme/app/pull/1","state":"open","created_at":"2024-05-01T10:00:00Z","updated_at":"2024-05-01T10:00:00Z","pull_request":{}}
        ]"#;
        let (api_url, request_rx) = spawn_github_stub("200 OK", body).await;
        let tickets = client(&api_url)
            .list_tickets(&repo(), IssueStateFilter::Closed, Page::first(50))
            .await
            .unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].state, TicketState::Closed);

        let request = request_rx.await.unwrap();
        assert!(request.starts_with(
            "GET /repos/acme/app/issues?state=closed&sort=created&direction=desc&per_page=50&page=1 "
        ));
    }

    #[tokio::test]
    async fn closing_patches_the_state() {
        let (api_url, request_rx) = spawn_github_stub("200 OK", ISSUE_JSON).await;
        client(&api_url)
            .set_ticket_state(&repo(), 42, TicketState::Closed)
            .await
            .unwrap();
        let request = request_rx.await.unwrap();
        assert!(request.starts_with("PATCH /repos/acme/app/issues/42 HTTP/1.1"));
        assert!(request.contains(r#"{"state":"closed"}"#));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let error = client(&format!("http://127.0.0.1:{port}"))
            .add_ticket_comment(&repo(), 42, "closing")
            .await
            .unwrap_err();
        assert!(matches!(error, TicketError::Transport(_)));
    }

    #[test]
    fn blank_token_is_rejected() {
        let result = GitHubTickets::new("https://api.github.com", "  ", Duration::from_secs(1));
        assert!(result.is_err());
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(Page::first(0).per_page, 1);
        assert_eq!(Page::first(250).per_page, 100);
    }
}
