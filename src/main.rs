use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hanzi_daily::config::Config;
use hanzi_daily::lesson::LessonTopic;
use hanzi_daily::provider::GeminiClient;
use hanzi_daily::session::LessonSession;
use hanzi_daily::speech::audio;
use hanzi_daily::store::{LessonStore, MemoryLessonStore, SqliteLessonStore};

#[derive(Parser)]
#[command(name = "hanzi-daily", version, about = "Daily Chinese vocabulary lessons with cached speech")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "HANZI_DAILY_CONFIG")]
    config: Option<PathBuf>,
    /// Keep lessons in memory only
    #[arg(long)]
    ephemeral: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print one day's lesson
    Lesson {
        day: u32,
        /// Print the lesson as JSON
        #[arg(long)]
        json: bool,
    },
    /// Synthesize one text
    Speak {
        text: String,
        /// Write the audio to a WAV file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Load a day and prefetch all of its audio
    Study { day: u32 },
    /// Clear every cached lesson
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config);

    let store: Arc<dyn LessonStore> = if cli.ephemeral {
        Arc::new(MemoryLessonStore::new())
    } else {
        let path = config.storage_path()?;
        info!(path = %path.display(), "opening lesson store");
        let mut store = SqliteLessonStore::open(&path)?;
        if let Some(limit) = config.storage.max_bytes {
            store = store.with_quota(limit);
        }
        Arc::new(store)
    };

    match cli.command {
        Command::Lesson { day, json } => {
            let session = build_session(&config, store)?;
            let lesson = session
                .lesson(day)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&*lesson)?);
            } else {
                print_lesson(&lesson);
            }
        }
        Command::Speak { text, out } => {
            let session = build_session(&config, store)?;
            let artifact = session
                .speak(&text)
                .await
                .map_err(|e| anyhow!(e.user_message()))?
                .context("nothing to speak")?;
            let samples = artifact.decode_pcm()?;
            println!(
                "{} ({}): {:.2}s",
                artifact.text,
                artifact.voice,
                audio::duration_secs(samples.len())
            );
            if let Some(path) = out {
                audio::write_wav(&path, &samples)?;
                println!("Wrote {}", path.display());
            }
        }
        Command::Study { day } => {
            let session = build_session(&config, store)?;
            let lesson = session
                .activate(day)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            print_lesson(&lesson);
            if let Some(report) = session.wait_for_prefetch().await {
                println!(
                    "\nAudio ready: {} fetched, {} already cached, {} retries.",
                    report.fetched, report.skipped, report.failed
                );
                if !report.unfetched.is_empty() {
                    println!("No audio for {} text(s):", report.unfetched.len());
                    for text in &report.unfetched {
                        println!("    {}", text);
                    }
                }
            }
            session.shutdown();
        }
        Command::Reset => {
            store.clear()?;
            println!("Lesson cache cleared.");
        }
    }

    Ok(())
}

fn build_session(config: &Config, store: Arc<dyn LessonStore>) -> Result<LessonSession> {
    if config.gemini.api_key.is_empty() {
        bail!("no API key: set GEMINI_API_KEY or gemini.api_key in the config file");
    }
    let client = Arc::new(GeminiClient::new(config.gemini.clone())?);
    Ok(LessonSession::from_config(config, store, client.clone(), client))
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_lesson(lesson: &LessonTopic) {
    println!("Day {}: {}", lesson.day, lesson.theme);
    for (i, word) in lesson.words.iter().enumerate() {
        println!(
            "\n{:>2}. {} [{}] {}",
            i + 1,
            word.word,
            word.phonetic,
            word.gloss
        );
        println!("    {}", word.sentence);
        println!("    {}", word.sentence_phonetic);
        println!("    {}", word.sentence_gloss);
    }
}
