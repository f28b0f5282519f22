//! CLI binary for edgequake-img2latex.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` / `BackendConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_img2latex::backend::DEFAULT_MODEL;
use edgequake_img2latex::pipeline::input::is_url;
use edgequake_img2latex::pipeline::preprocess::blur_variance;
use edgequake_img2latex::{
    BackendConfig, ConversionConfig, ConversionError, ConversionProgressCallback,
    ConversionResponse, Converter, ErrorKind, ErrorResponse, PreprocessProfile, ProgressCallback,
    SanitizePolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_pages} page(s) to LaTeX…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_blurry(&self, page_num: usize, variance: f64) {
        self.bar.println(format!(
            "  {} Page {:>3} looks blurry {}",
            yellow("!"),
            page_num,
            dim(&format!("(sharpness {variance:.1})")),
        ));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, latex_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{latex_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.finish_and_clear();
    }

    fn on_conversion_complete(&self, total_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} page(s) converted",
            green("✔"),
            bold(&total_pages.to_string())
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Photo of a whiteboard (stdout)
  img2latex whiteboard.jpg

  # Multi-page PDF to file
  img2latex lecture-notes.pdf -o notes.tex

  # Faint pencil on textured paper
  img2latex --profile binarize scan.png

  # Remote file
  img2latex https://example.com/homework.pdf --json

  # Any OpenAI-compatible server (vLLM, LM Studio, …)
  img2latex --endpoint http://localhost:8000/v1/chat/completions --model qwen2-vl page.png

  # Only check whether an image is too blurry
  img2latex --check-blur photo.jpg

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (also used by --endpoint when --api-key is absent)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  IMG2LATEX_PROVIDER      Provider name (openai, anthropic, gemini, ollama, …)
  IMG2LATEX_MODEL         Model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory), needed for PDF input

EXIT STATUS:
  0  success
  1  conversion failed
  2  unsupported input format
"#;

/// Convert images and PDFs of documents to LaTeX using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "img2latex",
    version,
    about = "Convert images and PDFs to LaTeX using Vision LLMs",
    long_about = "Convert photos, scans and PDFs of handwritten or printed pages into \
compilable LaTeX documents, one per page, using a Vision Language Model. Supports every \
edgequake-llm provider and any OpenAI-compatible chat-completions endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local .pdf/.png/.jpg/.jpeg file or HTTP/HTTPS URL.
    input: String,

    /// Write LaTeX to this file instead of stdout.
    #[arg(short, long, env = "IMG2LATEX_OUTPUT")]
    output: Option<PathBuf>,

    /// Print a JSON response body instead of LaTeX.
    #[arg(long, env = "IMG2LATEX_JSON")]
    json: bool,

    /// edgequake-llm provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "IMG2LATEX_PROVIDER")]
    provider: Option<String>,

    /// Vision model ID.
    #[arg(long, env = "IMG2LATEX_MODEL")]
    model: Option<String>,

    /// OpenAI-compatible chat-completions URL; bypasses the provider factory.
    #[arg(long, env = "IMG2LATEX_ENDPOINT", conflicts_with = "provider")]
    endpoint: Option<String>,

    /// Bearer token for --endpoint. Defaults to OPENAI_API_KEY.
    #[arg(long, env = "IMG2LATEX_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Image preprocessing: resize (bound size only) or binarize.
    #[arg(long, env = "IMG2LATEX_PROFILE", value_enum, default_value = "resize")]
    profile: ProfileArg,

    /// PDF rasterisation zoom (2.0 = 144 DPI).
    #[arg(long, env = "IMG2LATEX_ZOOM", default_value_t = 2.0)]
    zoom: f32,

    /// Longest image edge sent to the model, in pixels.
    #[arg(long, env = "IMG2LATEX_MAX_DIMENSION", default_value_t = 2000)]
    max_dimension: u32,

    /// Laplacian-variance threshold below which a page is reported as blurry.
    #[arg(long, env = "IMG2LATEX_BLUR_THRESHOLD", default_value_t = 100.0)]
    blur_threshold: f64,

    /// Skip the blur check.
    #[arg(long)]
    no_blur_check: bool,

    /// Max model output tokens per page.
    #[arg(long, env = "IMG2LATEX_MAX_TOKENS", default_value_t = 1500)]
    max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "IMG2LATEX_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-page model call timeout in seconds.
    #[arg(long, env = "IMG2LATEX_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "IMG2LATEX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Pages recognised concurrently (output order is unchanged).
    #[arg(long, env = "IMG2LATEX_PAGE_CONCURRENCY", default_value_t = 1)]
    page_concurrency: usize,

    /// Path to a text file replacing the default instruction.
    #[arg(long, env = "IMG2LATEX_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Also normalise line endings, trailing spaces and invisible characters.
    #[arg(long)]
    thorough_sanitize: bool,

    /// Only report whether the input image is blurry, then exit.
    #[arg(long)]
    check_blur: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMG2LATEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMG2LATEX_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, env = "IMG2LATEX_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ProfileArg {
    Resize,
    Binarize,
}

impl From<ProfileArg> for PreprocessProfile {
    fn from(v: ProfileArg) -> Self {
        match v {
            ProfileArg::Resize => PreprocessProfile::ResizeOnly,
            ProfileArg::Binarize => PreprocessProfile::Binarize,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are hidden while the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.check_blur;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(&cli, show_progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let conversion = e.downcast_ref::<ConversionError>();
            if cli.json {
                let body = match conversion {
                    Some(ce) => ErrorResponse::from(ce),
                    None => ErrorResponse::new(error_message(&e)),
                };
                if let Ok(json) = serde_json::to_string_pretty(&body) {
                    println!("{json}");
                }
            } else {
                eprintln!("{} {}", red("error:"), error_message(&e));
            }

            match conversion.map(|ce| ce.kind()) {
                Some(ErrorKind::UnsupportedFormat) => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

/// One-line error text. A `ConversionError` already names its cause, so its
/// source chain is not appended again.
fn error_message(e: &anyhow::Error) -> String {
    match e.downcast_ref::<ConversionError>() {
        Some(ce) => ce.to_string(),
        None => format!("{e:#}"),
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    if cli.check_blur {
        return check_blur(cli).await;
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(cli, progress_cb).await?;
    let converter = Converter::from_backend_config(&backend_config(cli), config)
        .context("Failed to configure the recognition backend")?;

    let start = Instant::now();
    let result = if is_url(&cli.input) {
        converter.convert_url(cli.input.clone()).await
    } else {
        converter.convert_path(&cli.input).await
    }?;

    if let Some(ref output_path) = cli.output {
        tokio::fs::write(output_path, result.joined())
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        if !cli.quiet && !cli.json {
            eprintln!(
                "{}  {} page(s)  {}ms  →  {}",
                green("✔"),
                result.page_count(),
                start.elapsed().as_millis(),
                bold(&output_path.display().to_string()),
            );
        }
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&ConversionResponse::from(result))
            .context("Failed to serialise output")?;
        println!("{json}");
    } else if cli.output.is_none() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(result.joined().as_bytes())
            .context("Failed to write to stdout")?;

        if !cli.quiet && !show_progress {
            eprintln!(
                "Converted {} page(s) in {}ms",
                result.page_count(),
                start.elapsed().as_millis()
            );
        }
    }

    Ok(())
}

/// `--check-blur`: report sharpness of a local image and exit.
async fn check_blur(cli: &Cli) -> Result<()> {
    let path = PathBuf::from(&cli.input);
    let variance = tokio::task::spawn_blocking(move || blur_variance(&path))
        .await
        .context("Blur check task failed")?
        .with_context(|| format!("Failed to read {}", cli.input))?;

    let blurry = variance < cli.blur_threshold;
    if cli.json {
        let body = serde_json::json!({
            "path": cli.input,
            "variance": variance,
            "threshold": cli.blur_threshold,
            "blurry": blurry,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else if blurry {
        println!(
            "{} {} is blurry (sharpness {:.1} < {:.1})",
            yellow("!"),
            cli.input,
            variance,
            cli.blur_threshold
        );
    } else {
        println!(
            "{} {} is sharp (sharpness {:.1} ≥ {:.1})",
            green("✓"),
            cli.input,
            variance,
            cli.blur_threshold
        );
    }
    Ok(())
}

/// Map backend flags to `BackendConfig`.
fn backend_config(cli: &Cli) -> BackendConfig {
    let model = cli.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());

    if let Some(ref endpoint) = cli.endpoint {
        let api_key = cli
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty());
        return BackendConfig::ChatCompletions {
            endpoint: endpoint.clone(),
            api_key,
            model,
        };
    }

    match (&cli.provider, &cli.model) {
        (Some(name), _) => BackendConfig::Provider {
            name: name.clone(),
            model,
        },
        (None, Some(_)) => BackendConfig::Provider {
            name: "openai".to_string(),
            model,
        },
        (None, None) => BackendConfig::Auto,
    }
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .zoom_factor(cli.zoom)
        .max_dimension(cli.max_dimension)
        .profile(cli.profile.into())
        .blur_threshold((!cli.no_blur_check).then_some(cli.blur_threshold))
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .page_concurrency(cli.page_concurrency)
        .sanitize(if cli.thorough_sanitize {
            SanitizePolicy::Thorough
        } else {
            SanitizePolicy::FenceStrip
        });

    if let Some(ref path) = cli.prompt_file {
        let instruction = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instruction from {:?}", path))?;
        builder = builder.instruction(instruction);
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
