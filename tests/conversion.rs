//! Integration tests for the conversion pipeline.
//!
//! Every test talks to an in-process [`RecognitionBackend`] (or a `wiremock`
//! server), so no API key is needed. Fixtures are generated in code: PNG/JPEG
//! via the `image` crate, PDFs as minimal hand-written documents.
//!
//! PDF tests need the pdfium shared library and are skipped when it cannot
//! be bound. Run them with:
//!   PDFIUM_LIB_PATH=/path/to/libpdfium cargo test --test conversion -- --nocapture
//! Set `PDFIUM_REQUIRED=1` (e.g. in CI) to turn those skips into failures.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_img2latex::pipeline::render::bind_pdfium;
use edgequake_img2latex::{
    ChatCompletionsBackend, ConversionConfig, ConversionConfigBuilder,
    ConversionProgressCallback, ConversionRequest, Converter, ErrorKind, ErrorResponse,
    PreprocessProfile, RecognitionBackend, RecognitionRequest, Stage, StageError,
};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const FENCED_REPLY: &str = "```\\documentclass{article}\\begin{document}X\\end{document}```";
const CLEAN_REPLY: &str = "\\documentclass{article}\\begin{document}X\\end{document}";

// ── Test helpers ─────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Set to make the PDF tests fail instead of skipping when pdfium is missing.
const PDFIUM_REQUIRED_ENV: &str = "PDFIUM_REQUIRED";

fn pdfium_required(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

/// Skip this test if the pdfium library cannot be bound, unless
/// `PDFIUM_REQUIRED` is set, in which case fail it.
macro_rules! skip_unless_pdfium {
    () => {{
        if let Err(e) = bind_pdfium() {
            let required = std::env::var(PDFIUM_REQUIRED_ENV).ok();
            if pdfium_required(required.as_deref()) {
                panic!("pdfium not available but {PDFIUM_REQUIRED_ENV} is set: {e}");
            }
            println!("SKIP — pdfium not available: {e}");
            return;
        }
    }};
}

#[test]
fn test_pdfium_required_switch_values() {
    assert!(pdfium_required(Some("1")));
    assert!(pdfium_required(Some("TRUE")));
    assert!(pdfium_required(Some(" yes ")));
    assert!(!pdfium_required(Some("0")));
    assert!(!pdfium_required(Some("")));
    assert!(!pdfium_required(None));
}

/// What the fake backend does for each call.
#[derive(Clone, Copy)]
enum Reply {
    /// Always return [`FENCED_REPLY`].
    Fenced,
    /// Return `w=<width>` of the decoded image, so page identity is visible.
    Width,
    /// Fail with an external-service error.
    Fail,
}

struct FakeBackend {
    reply: Reply,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    entered: AtomicBool,
    finished: AtomicBool,
}

impl FakeBackend {
    fn new(reply: Reply) -> Arc<Self> {
        Self::with_delay(reply, Duration::ZERO)
    }

    fn with_delay(reply: Reply, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            entered: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RecognitionBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.entered.store(true, Ordering::SeqCst);

        let width = decoded_width(&request.image.base64);
        // Wider pages answer faster, so unordered collection would reorder them.
        let delay = match self.reply {
            Reply::Width => self.delay.saturating_sub(Duration::from_millis(width as u64 / 4)),
            _ => self.delay,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.store(true, Ordering::SeqCst);

        match self.reply {
            Reply::Fenced => Ok(FENCED_REPLY.to_string()),
            Reply::Width => Ok(format!("```latex\nw={width}\n```")),
            Reply::Fail => Err(StageError::ExternalService {
                message: "HTTP 503 Service Unavailable".into(),
            }),
        }
    }
}

fn decoded_width(b64: &str) -> u32 {
    STANDARD
        .decode(b64)
        .ok()
        .and_then(|bytes| image::load_from_memory(&bytes).ok())
        .map(|img| img.width())
        .unwrap_or(0)
}

/// A sharp checkerboard so the blur check stays quiet.
fn sharp_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
        if ((x / 4) + (y / 4)) % 2 == 0 {
            Luma([0])
        } else {
            Luma([255])
        }
    }))
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

/// A minimal PDF with one page per entry in `widths` (in points, 100 pt tall),
/// each with a filled rectangle. Offsets in the xref table are exact.
fn minimal_pdf(widths: &[u32]) -> Vec<u8> {
    let mut objects: Vec<String> = Vec::new();
    let kids = (0..widths.len())
        .map(|i| format!("{} 0 R", 3 + 2 * i))
        .collect::<Vec<_>>()
        .join(" ");
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    objects.push(format!(
        "<< /Type /Pages /Kids [{kids}] /Count {} >>",
        widths.len()
    ));
    for (i, w) in widths.iter().enumerate() {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {w} 100] /Resources << >> /Contents {} 0 R >>",
            4 + 2 * i
        ));
        let content = "0 0 0 rg 10 10 40 40 re f";
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ));
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for off in offsets {
        out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    out
}

fn config_in(root: &Path) -> ConversionConfigBuilder {
    ConversionConfig::builder().workspace_root(root)
}

fn assert_no_workspace_left(root: &Path) {
    let left: Vec<_> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert!(left.is_empty(), "workspace leaked: {left:?}");
}

// ── Image input ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_image_upload_single_page() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(Reply::Fenced);
    let converter = Converter::new(backend.clone(), config_in(root.path()).build().unwrap());

    let bytes = encode(&sharp_image(120, 80), ImageFormat::Png);
    let result = converter
        .convert(ConversionRequest::upload("equation.png", bytes))
        .await
        .expect("conversion should succeed");

    assert_eq!(result.latex_content, vec![CLEAN_REPLY.to_string()]);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_no_workspace_left(root.path());
}

#[tokio::test]
async fn test_jpeg_path_is_downscaled_before_upload() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let files = tempfile::tempdir().unwrap();
    let path = files.path().join("Whiteboard.JPEG");
    std::fs::write(&path, encode(&sharp_image(2400, 600), ImageFormat::Jpeg)).unwrap();

    let backend = FakeBackend::new(Reply::Width);
    let converter = Converter::new(backend.clone(), config_in(root.path()).build().unwrap());

    let result = converter.convert_path(&path).await.unwrap();
    assert_eq!(result.latex_content, vec!["w=2000".to_string()]);
    assert_no_workspace_left(root.path());
}

#[tokio::test]
async fn test_binarize_profile_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(Reply::Width);
    let config = config_in(root.path())
        .profile(PreprocessProfile::Binarize)
        .build()
        .unwrap();
    let converter = Converter::new(backend, config);

    let result = converter
        .convert(ConversionRequest::upload(
            "scan.jpg",
            encode(&sharp_image(64, 64), ImageFormat::Jpeg),
        ))
        .await
        .unwrap();
    assert_eq!(result.latex_content, vec!["w=64".to_string()]);
}

// ── Rejections and failures ──────────────────────────────────────────────────

#[tokio::test]
async fn test_txt_upload_rejected_before_workspace() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(Reply::Fenced);
    let converter = Converter::new(backend.clone(), config_in(root.path()).build().unwrap());

    let err = converter
        .convert(ConversionRequest::upload("notes.txt", b"\\alpha".to_vec()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    assert_eq!(err.stage(), Stage::Validate);
    assert!(err.is_client_error());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert_no_workspace_left(root.path());

    let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
    assert_eq!(body["status"], "error");
    assert!(body["detail"].as_str().unwrap().contains("PNG, JPG, or JPEG"));
}

#[tokio::test]
async fn test_unsupported_url_is_not_downloaded() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("hello"))
        .expect(0)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let converter = Converter::new(
        FakeBackend::new(Reply::Fenced),
        config_in(root.path()).build().unwrap(),
    );

    let err = converter
        .convert_url(format!("{}/notes.gif", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    assert_no_workspace_left(root.path());
}

#[tokio::test]
async fn test_backend_failure_aborts_and_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let converter = Converter::new(
        FakeBackend::new(Reply::Fail),
        config_in(root.path()).build().unwrap(),
    );

    let err = converter
        .convert(ConversionRequest::upload(
            "page.png",
            encode(&sharp_image(32, 32), ImageFormat::Png),
        ))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExternalService);
    assert_eq!(err.stage(), Stage::Recognize);
    assert_eq!(err.page(), Some(1));
    assert!(err.to_string().contains("503"), "got: {err}");
    assert_no_workspace_left(root.path());
}

#[tokio::test]
async fn test_undecodable_image_is_decode_error() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(Reply::Fenced);
    let converter = Converter::new(backend.clone(), config_in(root.path()).build().unwrap());

    let err = converter
        .convert(ConversionRequest::upload(
            "photo.jpg",
            b"this is not a jpeg".to_vec(),
        ))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Decode);
    assert_eq!(err.stage(), Stage::Preprocess);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert_no_workspace_left(root.path());
}

#[tokio::test]
async fn test_empty_upload_is_empty_file_error() {
    let root = tempfile::tempdir().unwrap();
    let converter = Converter::new(
        FakeBackend::new(Reply::Fenced),
        config_in(root.path()).build().unwrap(),
    );

    let err = converter
        .convert(ConversionRequest::upload("blank.png", Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyFile);
    assert_no_workspace_left(root.path());
}

// ── PDF input ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_three_page_pdf_end_to_end() {
    skip_unless_pdfium!();
    init_tracing();

    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(Reply::Fenced);
    let converter = Converter::new(backend.clone(), config_in(root.path()).build().unwrap());

    let result = converter
        .convert(ConversionRequest::upload(
            "handout.pdf",
            minimal_pdf(&[200, 200, 200]),
        ))
        .await
        .expect("conversion should succeed");

    assert_eq!(result.page_count(), 3);
    for page in &result.latex_content {
        assert_eq!(page, CLEAN_REPLY);
    }
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    assert_no_workspace_left(root.path());
}

#[tokio::test]
async fn test_pdf_pages_keep_order_at_zoom() {
    skip_unless_pdfium!();

    let root = tempfile::tempdir().unwrap();
    let converter = Converter::new(
        FakeBackend::new(Reply::Width),
        config_in(root.path()).build().unwrap(),
    );

    let result = converter
        .convert(ConversionRequest::upload(
            "widths.PDF",
            minimal_pdf(&[100, 150, 250]),
        ))
        .await
        .unwrap();

    // Default zoom 2.0 doubles every width.
    assert_eq!(result.latex_content, vec!["w=200", "w=300", "w=500"]);
}

#[tokio::test]
async fn test_concurrent_pages_keep_order() {
    skip_unless_pdfium!();

    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::with_delay(Reply::Width, Duration::from_millis(300));
    let config = config_in(root.path()).page_concurrency(3).build().unwrap();
    let converter = Converter::new(backend.clone(), config);

    let result = converter
        .convert(ConversionRequest::upload(
            "mixed.pdf",
            minimal_pdf(&[100, 300, 200, 400]),
        ))
        .await
        .unwrap();

    assert_eq!(
        result.latex_content,
        vec!["w=200", "w=600", "w=400", "w=800"]
    );
    assert!(backend.max_in_flight.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn test_zero_page_pdf_is_rasterization_error() {
    skip_unless_pdfium!();

    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new(Reply::Fenced);
    let converter = Converter::new(backend.clone(), config_in(root.path()).build().unwrap());

    let err = converter
        .convert(ConversionRequest::upload("empty.pdf", minimal_pdf(&[])))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Rasterization);
    assert_eq!(err.stage(), Stage::Rasterize);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert_no_workspace_left(root.path());
}

#[tokio::test]
async fn test_corrupt_pdf_is_rasterization_error() {
    skip_unless_pdfium!();

    let root = tempfile::tempdir().unwrap();
    let converter = Converter::new(
        FakeBackend::new(Reply::Fenced),
        config_in(root.path()).build().unwrap(),
    );

    let err = converter
        .convert(ConversionRequest::upload(
            "broken.pdf",
            b"%PDF-1.4\nnot really".to_vec(),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rasterization);
    assert_no_workspace_left(root.path());
}

// ── Progress events ──────────────────────────────────────────────────────────

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl ConversionProgressCallback for EventLog {
    fn on_conversion_start(&self, total_pages: usize) {
        self.0.lock().unwrap().push(format!("start {total_pages}"));
    }
    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        self.0.lock().unwrap().push(format!("page {page_num}"));
    }
    fn on_page_blurry(&self, page_num: usize, _variance: f64) {
        self.0.lock().unwrap().push(format!("blurry {page_num}"));
    }
    fn on_page_complete(&self, page_num: usize, _total_pages: usize, _latex_len: usize) {
        self.0.lock().unwrap().push(format!("done {page_num}"));
    }
    fn on_page_error(&self, page_num: usize, _total_pages: usize, _error: &str) {
        self.0.lock().unwrap().push(format!("error {page_num}"));
    }
    fn on_conversion_complete(&self, total_pages: usize) {
        self.0.lock().unwrap().push(format!("complete {total_pages}"));
    }
}

#[tokio::test]
async fn test_progress_events_for_flat_image() {
    let root = tempfile::tempdir().unwrap();
    let log = Arc::new(EventLog::default());
    let config = config_in(root.path())
        .progress_callback(log.clone())
        .build()
        .unwrap();
    let converter = Converter::new(FakeBackend::new(Reply::Fenced), config);

    let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(40, 40, Luma([200])));
    converter
        .convert(ConversionRequest::upload(
            "flat.png",
            encode(&flat, ImageFormat::Png),
        ))
        .await
        .expect("blurry pages are still converted");

    assert_eq!(
        *log.0.lock().unwrap(),
        vec!["start 1", "page 1", "blurry 1", "done 1", "complete 1"]
    );
}

#[tokio::test]
async fn test_progress_events_on_failure() {
    let root = tempfile::tempdir().unwrap();
    let log = Arc::new(EventLog::default());
    let config = config_in(root.path())
        .blur_threshold(None)
        .progress_callback(log.clone())
        .build()
        .unwrap();
    let converter = Converter::new(FakeBackend::new(Reply::Fail), config);

    let _ = converter
        .convert(ConversionRequest::upload(
            "a.png",
            encode(&sharp_image(16, 16), ImageFormat::Png),
        ))
        .await;

    assert_eq!(
        *log.0.lock().unwrap(),
        vec!["start 1", "page 1", "error 1"]
    );
}

// ── Concurrency and lifecycle ────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_conversion_ceiling() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::with_delay(Reply::Fenced, Duration::from_millis(100));
    let config = config_in(root.path())
        .max_concurrent_conversions(1)
        .build()
        .unwrap();
    let converter = Arc::new(Converter::new(backend.clone(), config));

    let bytes = encode(&sharp_image(16, 16), ImageFormat::Png);
    let handles: Vec<_> = (0..3)
        .map(|i| {
            let converter = Arc::clone(&converter);
            let bytes = bytes.clone();
            tokio::spawn(async move {
                converter
                    .convert(ConversionRequest::upload(format!("p{i}.png"), bytes))
                    .await
            })
        })
        .collect();

    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
    assert_no_workspace_left(root.path());
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_conversion() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend::with_delay(Reply::Fenced, Duration::from_millis(300));
    let converter = Arc::new(Converter::new(
        backend.clone(),
        config_in(root.path()).build().unwrap(),
    ));

    let worker = {
        let converter = Arc::clone(&converter);
        let bytes = encode(&sharp_image(16, 16), ImageFormat::Png);
        tokio::spawn(async move {
            converter
                .convert(ConversionRequest::upload("slow.png", bytes))
                .await
        })
    };

    while !backend.entered.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    converter.shutdown().await;
    assert!(backend.finished.load(Ordering::SeqCst));
    assert!(worker.await.unwrap().is_ok());

    let err = converter
        .convert(ConversionRequest::upload(
            "late.png",
            encode(&sharp_image(16, 16), ImageFormat::Png),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_no_workspace_left(root.path());
}

// ── HTTP backend ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_completions_backend_end_to_end() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": FENCED_REPLY } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let backend = ChatCompletionsBackend::new(
        format!("{}/v1/chat/completions", server.uri()),
        Some("sk-test".into()),
        "gpt-4o-2024-08-06",
    );
    let converter = Converter::new(Arc::new(backend), config_in(root.path()).build().unwrap());

    let result = converter
        .convert(ConversionRequest::upload(
            "page.png",
            encode(&sharp_image(48, 48), ImageFormat::Png),
        ))
        .await
        .unwrap();
    assert_eq!(result.latex_content, vec![CLEAN_REPLY.to_string()]);
    assert_no_workspace_left(root.path());
}

#[tokio::test]
async fn test_url_input_downloads_then_converts() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uploads/derivation.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(encode(&sharp_image(90, 30), ImageFormat::Png)),
        )
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let converter = Converter::new(
        FakeBackend::new(Reply::Width),
        config_in(root.path()).build().unwrap(),
    );

    let result = converter
        .convert_url(format!("{}/uploads/derivation.png", server.uri()))
        .await
        .unwrap();
    assert_eq!(result.latex_content, vec!["w=90".to_string()]);
    assert_no_workspace_left(root.path());
}
