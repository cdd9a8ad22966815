#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The remote side: API traits used by the sync engine and the Canvas REST
//! client that implements them.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url, header::LINK};
use serde::{Deserialize, de::DeserializeOwned};
use tokio::sync::OnceCell;

use crate::{
    codec::format_number,
    config::CourseConfig,
    constants::{PAGE_SIZE, QUIZ_REPORT_POLL_SECS, QUIZ_REPORT_TIMEOUT_SECS},
    document::{IdentityKind, ResolvedIdentity},
    error::{Result, SyncError},
};

/// Which course collection to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// `/assignments`
    Assignments,
    /// `/quizzes`
    Quizzes,
}

impl CandidateKind {
    /// Collection path segment.
    fn collection(self) -> &'static str {
        match self {
            CandidateKind::Assignments => "assignments",
            CandidateKind::Quizzes => "quizzes",
        }
    }
}

/// An assignment or quiz the operator can pick.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    /// Assignment or quiz id.
    pub id:              i64,
    /// `name` for assignments, `title` for quizzes.
    #[serde(alias = "name")]
    pub title:           Option<String>,
    /// Due date as returned by Canvas.
    pub due_at:          Option<String>,
    /// Link to the item in the Canvas UI.
    pub html_url:        Option<String>,
    /// Maximum score.
    pub points_possible: Option<f64>,
    /// Backing assignment of a quiz.
    pub assignment_id:   Option<i64>,
    /// Quiz description (HTML).
    pub description:     Option<String>,
}

impl Candidate {
    /// Title, or a placeholder when Canvas has none.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Untitled")
    }
}

/// Student information embedded in a submission.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteUser {
    /// Canvas user id.
    pub id:          Option<i64>,
    /// Display name.
    pub name:        Option<String>,
    /// SIS user id, when the token may see it.
    pub sis_user_id: Option<String>,
    /// Login id, when the token may see it.
    pub login_id:    Option<String>,
}

/// One comment on a submission.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteComment {
    /// Comment body.
    pub comment:     Option<String>,
    /// Author display name.
    pub author_name: Option<String>,
}

/// A file attached to a submission.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Attachment {
    /// Stored file name.
    pub filename:     Option<String>,
    /// Name shown in Canvas.
    pub display_name: Option<String>,
    /// Download URL.
    pub url:          Option<String>,
}

impl Attachment {
    /// Best available file name.
    pub fn file_name(&self) -> Option<&str> {
        self.filename.as_deref().or(self.display_name.as_deref())
    }

    /// Whether the attachment looks like a PDF.
    pub fn is_pdf(&self) -> bool {
        self.file_name()
            .is_some_and(|name| name.to_ascii_lowercase().ends_with(".pdf"))
    }
}

/// A submission as returned by the submissions endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteSubmission {
    /// Canvas user id of the student.
    pub user_id:             Option<i64>,
    /// Numeric score.
    pub score:               Option<f64>,
    /// Current attempt number, used to attach comments to it.
    pub attempt:             Option<i64>,
    /// Score before late penalties.
    pub entered_score:       Option<f64>,
    /// Grade string (`"9.5"`, `"A-"`, ...).
    pub grade:               Option<String>,
    /// Embedded user, requested with `include[]=user`.
    pub user:                Option<RemoteUser>,
    /// Comments in chronological order.
    #[serde(default)]
    pub submission_comments: Vec<RemoteComment>,
    /// Uploaded files.
    #[serde(default)]
    pub attachments:         Vec<Attachment>,
}

impl RemoteSubmission {
    /// Canvas user id from the submission or its embedded user.
    pub fn canvas_user_id(&self) -> Option<i64> {
        self.user_id
            .or_else(|| self.user.as_ref().and_then(|u| u.id))
    }

    /// Student name, if Canvas returned one.
    pub fn student_name(&self) -> Option<&str> {
        self.user.as_ref().and_then(|u| u.name.as_deref())
    }

    /// Numeric score, falling back to the entered score and the grade
    /// string.
    pub fn current_score(&self) -> Option<f64> {
        self.score
            .or(self.entered_score)
            .or_else(|| self.grade.as_deref().and_then(|g| g.trim().parse().ok()))
    }

    /// Most recent comment text.
    pub fn latest_comment(&self) -> Option<&str> {
        self.submission_comments
            .iter()
            .rev()
            .find_map(|c| c.comment.as_deref())
    }
}

/// Remote score and comment of one submission, as captured for backups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentGrade {
    /// Current score.
    pub score:   Option<f64>,
    /// Latest comment.
    pub comment: Option<String>,
    /// Submission attempt new comments belong to.
    pub attempt: Option<i64>,
}

impl From<&RemoteSubmission> for CurrentGrade {
    fn from(sub: &RemoteSubmission) -> Self {
        Self {
            score:   sub.current_score(),
            comment: sub.latest_comment().map(str::to_string),
            attempt: sub.attempt,
        }
    }
}

/// Remote operations used by the upload path.
#[allow(async_fn_in_trait)]
pub trait GradingApi {
    /// Canvas user id behind an SIS-keyed identity.
    ///
    /// Some institutions do not accept `sis_user_id:` keys in submission
    /// paths. `Ok(None)` means no numeric id was found and the identity is
    /// addressed as written.
    async fn resolve_user(&self, identity: &ResolvedIdentity) -> Result<Option<i64>>;

    /// Current score and latest comment for one student.
    async fn get_current_grade(
        &self,
        assignment_id: i64,
        identity: &ResolvedIdentity,
    ) -> Result<CurrentGrade>;

    /// Sets the student's score.
    async fn post_grade(
        &self,
        assignment_id: i64,
        identity: &ResolvedIdentity,
        score: f64,
    ) -> Result<()>;

    /// Adds an HTML comment to the student's submission, on `attempt` when
    /// known.
    async fn post_comment(
        &self,
        assignment_id: i64,
        identity: &ResolvedIdentity,
        html: &str,
        attempt: Option<i64>,
    ) -> Result<()>;
}

/// Remote operations used by the download path.
#[allow(async_fn_in_trait)]
pub trait CourseApi {
    /// Lists assignments or quizzes.
    async fn list_candidates(&self, kind: CandidateKind) -> Result<Vec<Candidate>>;

    /// All submissions of an assignment, with users, comments and
    /// attachments.
    async fn fetch_submissions(&self, assignment_id: i64) -> Result<Vec<RemoteSubmission>>;

    /// Raw bytes of an attachment.
    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>>;

    /// The quiz "Student Analysis" CSV report.
    async fn quiz_student_analysis(&self, quiz_id: i64) -> Result<Vec<u8>>;
}

/// Quiz report resource.
#[derive(Debug, Deserialize)]
struct QuizReport {
    /// Report id, used for polling.
    id:   Option<i64>,
    /// Generated file, once ready.
    file: Option<ReportFile>,
}

/// File attached to a finished quiz report.
#[derive(Debug, Deserialize)]
struct ReportFile {
    /// Download URL.
    url: Option<String>,
}

impl QuizReport {
    /// Download URL once Canvas has generated the report.
    fn ready_url(&self) -> Option<&str> {
        self.file.as_ref().and_then(|f| f.url.as_deref())
    }
}

/// Canvas REST client for one course.
#[derive(Debug, Clone)]
pub struct CanvasClient {
    /// Shared HTTP client.
    http:   Client,
    /// Course context.
    config: CourseConfig,
    /// Parsed `base_url`.
    base:   Url,
    /// `sis_user_id:`/`sis_login_id:` keys of course students, fetched once.
    roster: Arc<OnceCell<HashMap<String, i64>>>,
}

impl CanvasClient {
    /// Creates a client for the configured course.
    pub fn new(config: CourseConfig) -> Result<Self> {
        let base = Url::parse(config.base_url())
            .map_err(|e| SyncError::Config(format!("invalid base_url {}: {e}", config.base_url())))?;
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("failed to construct HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            base,
            roster: Arc::default(),
        })
    }

    /// Returns the course configuration.
    pub fn config(&self) -> &CourseConfig {
        &self.config
    }

    /// `<base>/api/v1/<segments...>`, each segment percent-encoded.
    fn api_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Config(format!("base_url {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    /// `<base>/api/v1/courses/<course>/<segments...>`.
    fn course_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.api_url(["courses", self.config.course_id()])?;
        url.path_segments_mut()
            .map_err(|_| SyncError::Config(format!("base_url {} cannot be a base", self.base)))?
            .extend(segments);
        Ok(url)
    }

    /// URL of one student's submission.
    fn submission_url(&self, assignment_id: i64, identity: &ResolvedIdentity) -> Result<Url> {
        let assignment = assignment_id.to_string();
        let user = identity.remote_key();
        self.course_url(["assignments", assignment.as_str(), "submissions", user.as_str()])
    }

    /// Adds the bearer token.
    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.config.token())
    }

    /// Follows `Link: rel="next"` headers until the collection is exhausted.
    async fn paginate<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url);
        let mut first = true;

        while let Some(url) = next.take() {
            tracing::debug!("GET {url}");
            let mut request = self.authed(self.http.get(url));
            if first {
                request = request.query(query).query(&[("per_page", PAGE_SIZE)]);
                first = false;
            }
            let response = checked(request.send().await?).await?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_link)
                .and_then(|link| Url::parse(&link).ok());
            let mut page: Vec<T> = response.json().await?;
            items.append(&mut page);
        }

        Ok(items)
    }

    /// Sends a form-encoded `PUT` to a submission.
    async fn put_submission(
        &self,
        assignment_id: i64,
        identity: &ResolvedIdentity,
        form: &[(&str, &str)],
    ) -> Result<()> {
        let url = self.submission_url(assignment_id, identity)?;
        tracing::debug!("PUT {url}");
        checked(self.authed(self.http.put(url)).form(form).send().await?).await?;
        Ok(())
    }

    /// Course students keyed by SIS user id and login, loaded on first use.
    ///
    /// A failed listing is logged and cached as empty.
    async fn roster(&self) -> &HashMap<String, i64> {
        self.roster
            .get_or_init(|| async {
                match self.fetch_roster().await {
                    Ok(roster) => roster,
                    Err(err) => {
                        tracing::warn!("Could not list course students: {err}");
                        HashMap::new()
                    }
                }
            })
            .await
    }

    /// Lists course students with their SIS fields.
    async fn fetch_roster(&self) -> Result<HashMap<String, i64>> {
        let url = self.course_url(["users"])?;
        let users: Vec<RemoteUser> = self
            .paginate(url, &[("enrollment_type[]", "student"), ("include[]", "sis_user_id")])
            .await?;
        Ok(roster_keys(&users))
    }
}

impl GradingApi for CanvasClient {
    async fn resolve_user(&self, identity: &ResolvedIdentity) -> Result<Option<i64>> {
        if identity.kind.is_canvas_id() {
            return Ok(None);
        }

        for key in lookup_keys(identity) {
            let url = self.api_url(["users", key.as_str()])?;
            tracing::debug!("GET {url}");
            let response = self.authed(self.http.get(url)).send().await?;
            if matches!(
                response.status(),
                StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) {
                continue;
            }
            let user: RemoteUser = checked(response).await?.json().await?;
            if let Some(id) = user.id {
                return Ok(Some(id));
            }
        }

        Ok(self.roster().await.get(&identity.remote_key()).copied())
    }

    async fn get_current_grade(
        &self,
        assignment_id: i64,
        identity: &ResolvedIdentity,
    ) -> Result<CurrentGrade> {
        let url = self.submission_url(assignment_id, identity)?;
        tracing::debug!("GET {url}");
        let request = self
            .authed(self.http.get(url))
            .query(&[("include[]", "submission_comments")]);
        let submission: RemoteSubmission = checked(request.send().await?).await?.json().await?;
        Ok(CurrentGrade::from(&submission))
    }

    async fn post_grade(
        &self,
        assignment_id: i64,
        identity: &ResolvedIdentity,
        score: f64,
    ) -> Result<()> {
        let score = format_number(score);
        self.put_submission(assignment_id, identity, &[("submission[posted_grade]", &score)])
            .await
    }

    async fn post_comment(
        &self,
        assignment_id: i64,
        identity: &ResolvedIdentity,
        html: &str,
        attempt: Option<i64>,
    ) -> Result<()> {
        let attempt = attempt.map(|n| n.to_string());
        let mut form = vec![("comment[text_comment]", html)];
        if let Some(attempt) = attempt.as_deref() {
            form.push(("comment[attempt]", attempt));
        }
        self.put_submission(assignment_id, identity, &form).await
    }
}

impl CourseApi for CanvasClient {
    async fn list_candidates(&self, kind: CandidateKind) -> Result<Vec<Candidate>> {
        let url = self.course_url([kind.collection()])?;
        self.paginate(url, &[]).await
    }

    async fn fetch_submissions(&self, assignment_id: i64) -> Result<Vec<RemoteSubmission>> {
        let assignment = assignment_id.to_string();
        let url = self.course_url(["assignments", assignment.as_str(), "submissions"])?;
        self.paginate(url, &[
            ("include[]", "user"),
            ("include[]", "submission_comments"),
            ("include[]", "attachments"),
        ])
        .await
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        let url = attachment
            .url
            .as_deref()
            .ok_or_else(|| SyncError::Api("attachment has no download url".into()))?;
        tracing::debug!("GET {url}");
        let bytes = checked(self.authed(self.http.get(url)).send().await?)
            .await?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn quiz_student_analysis(&self, quiz_id: i64) -> Result<Vec<u8>> {
        let quiz = quiz_id.to_string();
        let reports = self.course_url(["quizzes", quiz.as_str(), "reports"])?;
        tracing::info!("Requesting student analysis report for quiz {quiz_id}");
        let request = self
            .authed(self.http.post(reports.clone()))
            .query(&[("quiz_report[report_type]", "student_analysis")]);
        let mut report: QuizReport = checked(request.send().await?).await?.json().await?;

        let started = Instant::now();
        let download = loop {
            if let Some(url) = report.ready_url() {
                break url.to_string();
            }
            if started.elapsed() > Duration::from_secs(QUIZ_REPORT_TIMEOUT_SECS) {
                return Err(SyncError::Api("timed out waiting for quiz report".into()));
            }
            let id = report
                .id
                .ok_or_else(|| SyncError::Api("quiz report id missing; cannot poll".into()))?
                .to_string();
            tokio::time::sleep(Duration::from_secs(QUIZ_REPORT_POLL_SECS)).await;

            let mut poll = reports.clone();
            poll.path_segments_mut()
                .map_err(|_| SyncError::Api("quiz report url cannot be a base".into()))?
                .push(&id);
            report = checked(self.authed(self.http.get(poll)).send().await?)
                .await?
                .json()
                .await?;
        };

        let bytes = checked(self.authed(self.http.get(download)).send().await?)
            .await?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

/// Passes successful responses through; turns the rest into
/// [`SyncError::Api`] carrying Canvas' own error message when there is one.
async fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| body.trim().chars().take(200).collect());
    Err(SyncError::Api(format!("{status}: {message}")))
}

/// Extracts the message from a Canvas error body.
///
/// Canvas answers with `{"errors": [{"message": ..}]}`, `{"errors": {..}}`
/// or `{"message": ..}` depending on the endpoint.
pub fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
        return Some(message.to_string());
    }
    let messages: Vec<String> = match value.get("errors")? {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .collect(),
        serde_json::Value::Object(fields) => fields
            .iter()
            .map(|(field, detail)| match detail {
                serde_json::Value::String(text) => format!("{field}: {text}"),
                other => format!("{field}: {other}"),
            })
            .collect(),
        serde_json::Value::String(text) => vec![text.clone()],
        _ => Vec::new(),
    };
    (!messages.is_empty()).then(|| messages.join("; "))
}

/// `/users/<key>` lookups for an SIS identity: its own prefix first, then the
/// other one.
fn lookup_keys(identity: &ResolvedIdentity) -> Vec<String> {
    let user = format!("sis_user_id:{}", identity.value);
    let login = format!("sis_login_id:{}", identity.value);
    match identity.kind {
        IdentityKind::SisLoginId => vec![login, user],
        _ => vec![user, login],
    }
}

/// Maps every SIS key of a roster to its Canvas user id.
fn roster_keys(users: &[RemoteUser]) -> HashMap<String, i64> {
    let mut keys = HashMap::new();
    for user in users {
        let Some(id) = user.id else { continue };
        if let Some(sis) = user.sis_user_id.as_deref() {
            keys.insert(format!("sis_user_id:{sis}"), id);
        }
        if let Some(login) = user.login_id.as_deref() {
            keys.insert(format!("sis_login_id:{login}"), id);
        }
    }
    keys
}

/// Extracts the `rel="next"` target from a Canvas `Link` header.
pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut sections = part.trim().split(';');
        let target = sections.next()?.trim();
        let is_next = sections.any(|param| {
            param
                .trim()
                .strip_prefix("rel=")
                .is_some_and(|rel| rel.trim_matches('"') == "next")
        });
        is_next.then(|| target.trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CanvasClient {
        CanvasClient::new(CourseConfig::new("https://canvas.example.edu/", "77", "t"))
            .expect("client")
    }

    #[test]
    fn sis_identities_keep_their_prefix_in_the_path() {
        let url = client()
            .submission_url(501, &ResolvedIdentity::new(IdentityKind::SisId, "s 1"))
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://canvas.example.edu/api/v1/courses/77/assignments/501/submissions/sis_user_id:s%201"
        );
    }

    #[test]
    fn user_lookups_are_rooted_at_the_api() {
        let url = client().api_url(["users", "sis_user_id:s1"]).expect("url");
        assert_eq!(url.as_str(), "https://canvas.example.edu/api/v1/users/sis_user_id:s1");
    }

    #[test]
    fn lookups_try_the_matching_prefix_first() {
        let login = ResolvedIdentity::new(IdentityKind::SisLoginId, "ada");
        assert_eq!(lookup_keys(&login), ["sis_login_id:ada", "sis_user_id:ada"]);
        let sis = ResolvedIdentity::new(IdentityKind::SisId, "s1");
        assert_eq!(lookup_keys(&sis), ["sis_user_id:s1", "sis_login_id:s1"]);
    }

    #[test]
    fn roster_indexes_both_sis_fields() {
        let users = [
            RemoteUser {
                id: Some(42),
                sis_user_id: Some("s1".into()),
                login_id: Some("ada".into()),
                ..RemoteUser::default()
            },
            RemoteUser {
                id: None,
                sis_user_id: Some("ghost".into()),
                ..RemoteUser::default()
            },
        ];
        let keys = roster_keys(&users);
        assert_eq!(keys.get("sis_user_id:s1"), Some(&42));
        assert_eq!(keys.get("sis_login_id:ada"), Some(&42));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn canvas_error_bodies_are_summarized() {
        assert_eq!(
            error_message(r#"{"errors":[{"message":"user not authorized"}]}"#).as_deref(),
            Some("user not authorized")
        );
        assert_eq!(
            error_message(r#"{"errors":{"posted_grade":"is invalid"}}"#).as_deref(),
            Some("posted_grade: is invalid")
        );
        assert_eq!(error_message(r#"{"message":"Not Found"}"#).as_deref(), Some("Not Found"));
        assert_eq!(error_message("<html>oops</html>"), None);
    }

    #[test]
    fn canvas_ids_are_used_verbatim() {
        let url = client()
            .submission_url(501, &ResolvedIdentity::new(IdentityKind::UserId, "42"))
            .expect("url");
        assert!(url.as_str().ends_with("/submissions/42"));
    }
}
