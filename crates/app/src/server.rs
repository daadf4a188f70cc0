use crate::render::{render_page, PageView, PLACEHOLDER};
use crate::state::{Notice, Resolved, SessionStore};
use axum::extract::{DefaultBodyLimit, Form, Multipart, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use docchat_core::{Document, QuestionOutcome, SessionError, UploadOutcome};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/ask", post(ask))
        .route("/health", get(health))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Html<String> {
    let Some(resolved) = state.sessions.lookup(&headers) else {
        return Html(render_page(&PageView {
            document_name: None,
            history: &[],
            notice: None,
        }));
    };

    let mut context = resolved.context.lock().await;
    let notice = context.notice.take();
    Html(render_page(&PageView {
        document_name: context.session.document_name(),
        history: context.session.history(),
        notice: notice.as_ref(),
    }))
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let resolved = state.sessions.resolve(&headers);
    let mut context = resolved.context.lock().await;

    let notice = match read_upload(&mut multipart).await {
        Ok(document) => match context.session.on_upload(document).await {
            Ok(UploadOutcome::Indexed { document, segments }) => Notice::success(format!(
                "{document} is ready ({segments} sections indexed). Ask away."
            )),
            Ok(UploadOutcome::AlreadyLoaded { document }) => Notice::info(format!(
                "{document} is already loaded; this session chats about one document."
            )),
            Err(error) => session_failure(resolved.id, "upload", &error),
        },
        Err(notice) => notice,
    };
    context.notice = Some(notice);
    drop(context);

    back_to_page(&resolved)
}

async fn read_upload(multipart: &mut Multipart) -> Result<Document, Notice> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(Notice::error("No file was uploaded.")),
            Err(error) => {
                warn!(%error, "failed to read multipart body");
                return Err(Notice::error(format!("Could not read the upload: {error}")));
            }
        };

        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("document.pdf").to_string();
        if !is_pdf(&file_name, field.content_type()) {
            return Err(Notice::error(format!(
                "{file_name} is not a PDF. Only PDF files are accepted."
            )));
        }

        return match field.bytes().await {
            Ok(bytes) => {
                info!(file = %file_name, bytes = bytes.len(), "upload received");
                Ok(Document::new(file_name, bytes.to_vec()))
            }
            Err(error) => {
                warn!(file = %file_name, %error, "failed to read upload");
                Err(Notice::error(format!("Could not read {file_name}: {error}")))
            }
        };
    }
}

fn is_pdf(file_name: &str, content_type: Option<&str>) -> bool {
    let by_type = content_type.is_some_and(|value| value.eq_ignore_ascii_case("application/pdf"));
    let by_extension = file_name.to_ascii_lowercase().ends_with(".pdf");
    by_type || by_extension
}

#[derive(Debug, Deserialize)]
struct AskForm {
    #[serde(default)]
    question: String,
}

async fn ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<AskForm>,
) -> Response {
    let resolved = state.sessions.resolve(&headers);
    let mut context = resolved.context.lock().await;

    match context.session.on_question(&form.question).await {
        Ok(QuestionOutcome::Answered(_)) => context.notice = None,
        // Blank input leaves any pending notice for the next render.
        Ok(QuestionOutcome::Ignored) => {}
        Ok(QuestionOutcome::NoDocument) => context.notice = Some(Notice::info(PLACEHOLDER)),
        Err(error) => context.notice = Some(session_failure(resolved.id, "question", &error)),
    }
    drop(context);

    back_to_page(&resolved)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len(),
    }))
}

fn session_failure(session: uuid::Uuid, action: &str, error: &SessionError) -> Notice {
    warn!(%session, action, stage = error.stage(), %error, "request failed");
    Notice::error(format!("The {} step failed: {error}", error.stage()))
}

fn back_to_page(resolved: &Resolved) -> Response {
    with_cookie(Redirect::to("/").into_response(), resolved)
}

fn with_cookie(mut response: Response, resolved: &Resolved) -> Response {
    if let Some(cookie) = resolved.set_cookie() {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{ASK_BUSY, UPLOAD_BUSY};
    use crate::state::SESSION_COOKIE;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use docchat_core::{
        CharacterNgramEmbedder, ChatMessage, Converted, ConversionError, DocumentIngestor,
        GenerationError, LanguageModel, Pipeline, PdfConverter,
    };
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    const UPLOAD_LIMIT: usize = 1024 * 1024;

    struct MarkdownConverter;

    impl PdfConverter for MarkdownConverter {
        fn name(&self) -> &str {
            "fixture"
        }

        fn convert_file(&self, _path: &Path) -> Result<Converted, ConversionError> {
            Ok(Converted {
                markdown: "# Results\n\nRevenue grew 12% in Q1.\n\n# Staff\n\nHeadcount was flat.\n"
                    .to_string(),
                page_count: 1,
            })
        }
    }

    struct CountingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for CountingModel {
        fn model_name(&self) -> &str {
            "counting"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, GenerationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("Answer number **{call}**"))
        }
    }

    fn app() -> (Router, Arc<CountingModel>) {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let pipeline = Pipeline::new(
            DocumentIngestor::new(Box::new(MarkdownConverter)),
            Arc::new(CharacterNgramEmbedder::default()),
            model.clone(),
        );
        let sessions = Arc::new(SessionStore::new(
            Arc::new(pipeline),
            Duration::from_secs(3600),
        ));
        (router(AppState { sessions }, UPLOAD_LIMIT), model)
    }

    fn cookie_from(response: &Response) -> String {
        let raw = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("session cookie")
            .to_str()
            .unwrap();
        raw.split(';').next().unwrap().to_string()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn with_session(request: Request<Body>, cookie: Option<&str>) -> Request<Body> {
        let (mut parts, body) = request.into_parts();
        if let Some(cookie) = cookie {
            parts
                .headers
                .insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        Request::from_parts(parts, body)
    }

    fn multipart_request(
        cookie: Option<&str>,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Request<Body> {
        let boundary = "docchat-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let request = Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        with_session(request, cookie)
    }

    fn ask_request(cookie: Option<&str>, question: &str) -> Request<Body> {
        let request = Request::post("/ask")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("question={question}")))
            .unwrap();
        with_session(request, cookie)
    }

    /// Sends a form post and returns the session cookie it was answered with.
    async fn post(app: &Router, request: Request<Body>) -> String {
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        cookie_from(&response)
    }

    async fn upload_report(app: &Router) -> String {
        post(
            app,
            multipart_request(None, "report.pdf", "application/pdf", b"%PDF-1.5 fixture"),
        )
        .await
    }

    async fn page(app: &Router, cookie: &str) -> String {
        let response = app
            .clone()
            .oneshot(
                Request::get("/")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        body_text(response).await
    }

    #[tokio::test]
    async fn first_visit_shows_placeholder_without_a_session() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());

        let body = body_text(response).await;
        assert!(body.contains(PLACEHOLDER));
        assert!(body.contains(UPLOAD_BUSY));

        let stale = page(&app, &format!("{SESSION_COOKIE}={}", uuid::Uuid::new_v4())).await;
        assert!(stale.contains(PLACEHOLDER));
    }

    #[tokio::test]
    async fn question_before_upload_does_not_call_the_model() {
        let (app, model) = app();
        let cookie = post(&app, ask_request(None, "anything")).await;
        assert!(cookie.starts_with(SESSION_COOKIE));

        let body = page(&app, &cookie).await;
        assert!(body.contains(PLACEHOLDER));
        assert!(body.contains("notice info"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upload_then_ask_records_turns_in_order() {
        let (app, model) = app();
        let cookie = upload_report(&app).await;

        let body = page(&app, &cookie).await;
        assert!(body.contains("report.pdf is ready"));
        assert!(body.contains(ASK_BUSY));

        for question in ["revenue%3F", "staff%3F"] {
            let response = app
                .clone()
                .oneshot(ask_request(Some(&cookie), question))
                .await
                .unwrap();
            assert!(response.headers().get(header::SET_COOKIE).is_none());
        }

        let body = page(&app, &cookie).await;
        let first = body.find("revenue?").unwrap();
        let second = body.find("staff?").unwrap();
        assert!(first < second);
        assert!(body.contains("<strong>1</strong>"));
        assert!(body.contains("<strong>2</strong>"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn blank_question_keeps_the_pending_notice() {
        let (app, model) = app();
        let cookie = upload_report(&app).await;

        app.clone()
            .oneshot(ask_request(Some(&cookie), "%20%20"))
            .await
            .unwrap();

        let body = page(&app, &cookie).await;
        assert!(body.contains("report.pdf is ready"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_pdf_upload_shows_an_error_banner() {
        let (app, _) = app();
        let cookie = post(
            &app,
            multipart_request(None, "notes.txt", "text/plain", b"hello"),
        )
        .await;

        let body = page(&app, &cookie).await;
        assert!(body.contains("notice error"));
        assert!(body.contains("Only PDF files are accepted."));
        assert!(body.contains(PLACEHOLDER));
    }

    #[tokio::test]
    async fn pdf_named_upload_with_wrong_bytes_fails_conversion() {
        let (app, _) = app();
        let cookie = post(
            &app,
            multipart_request(None, "fake.pdf", "application/pdf", b"not really a pdf"),
        )
        .await;

        let body = page(&app, &cookie).await;
        assert!(body.contains("The conversion step failed"));
        assert!(body.contains(PLACEHOLDER));
    }

    #[tokio::test]
    async fn page_views_do_not_grow_the_session_map() {
        let (app, _) = app();
        for _ in 0..3 {
            app.clone()
                .oneshot(Request::get("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
        }

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(value["sessions"], 0);
    }

    #[tokio::test]
    async fn health_reports_version() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let value: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn pdf_detection_accepts_type_or_extension() {
        assert!(is_pdf("a.pdf", None));
        assert!(is_pdf("A.PDF", Some("application/octet-stream")));
        assert!(is_pdf("upload", Some("application/pdf")));
        assert!(!is_pdf("notes.txt", Some("text/plain")));
    }
}
