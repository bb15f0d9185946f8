use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::chunk::DEFAULT_MAX_CHARS;
use crate::fetch::FetchSettings;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract the title and text of one chapter page as JSON.
    Extract(ExtractArgs),
    /// List the chapter links found on a table-of-contents page.
    Discover(DiscoverArgs),
    /// Extract a whole novel into the library and wait for the job.
    Ingest(IngestArgs),
    /// Synthesize audio for a chapter or a whole novel and wait for the job.
    Synthesize(SynthesizeArgs),
    /// Split a text file into synthesis-sized chunks.
    Chunk(ChunkArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct FetchArgs {
    /// Fetch attempts per page.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Backoff before the second attempt; doubles after each failure.
    #[arg(long)]
    pub backoff_ms: Option<u64>,
}

impl FetchArgs {
    pub fn apply(&self, mut settings: FetchSettings) -> FetchSettings {
        if let Some(retries) = self.retries {
            settings.max_retries = retries;
        }
        if let Some(ms) = self.backoff_ms {
            settings.base_backoff = Duration::from_millis(ms);
        }
        settings
    }
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Chapter page URL.
    #[arg(long)]
    pub url: String,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// Table-of-contents page URL.
    #[arg(long)]
    pub url: String,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Table-of-contents page URL (or a single chapter page).
    #[arg(long)]
    pub url: String,

    /// Data directory (catalog and library). Defaults to WEBNOVEL_DATA_DIR.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, default_value = "")]
    pub title: String,

    #[arg(long, default_value = "")]
    pub author: String,

    #[arg(long, default_value = "")]
    pub description: String,

    /// Free-text tags, e.g. "fantasy, romance".
    #[arg(long, default_value = "")]
    pub tags: String,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

#[derive(Debug, Args)]
pub struct SynthesizeArgs {
    /// Data directory (catalog and library). Defaults to WEBNOVEL_DATA_DIR.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Synthesize every chapter of this novel that has no audio yet.
    #[arg(long, conflicts_with = "chapter_id", required_unless_present = "chapter_id")]
    pub novel_id: Option<String>,

    /// Synthesize this chapter only.
    #[arg(long)]
    pub chapter_id: Option<String>,

    /// Provider name (`silent`, or `openai` when OPENAI_API_KEY is set).
    #[arg(long)]
    pub provider: Option<String>,
}

#[derive(Debug, Args)]
pub struct ChunkArgs {
    /// Plain-text file to split.
    #[arg(long)]
    pub file: String,

    /// Maximum characters per chunk.
    #[arg(long, default_value_t = DEFAULT_MAX_CHARS)]
    pub max_chars: usize,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;
    use clap::Parser as _;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn synthesize_needs_exactly_one_target() {
        assert!(Cli::try_parse_from(["webnovel", "synthesize"]).is_err());
        assert!(
            Cli::try_parse_from([
                "webnovel",
                "synthesize",
                "--novel-id",
                "n",
                "--chapter-id",
                "c"
            ])
            .is_err()
        );
        assert!(Cli::try_parse_from(["webnovel", "synthesize", "--chapter-id", "c"]).is_ok());
    }

    #[test]
    fn fetch_args_override_defaults() {
        let cli = Cli::try_parse_from([
            "webnovel",
            "extract",
            "--url",
            "https://example.com",
            "--retries",
            "1",
            "--backoff-ms",
            "5",
        ])
        .unwrap();
        let Command::Extract(args) = cli.command else {
            panic!("expected extract");
        };
        let settings = args.fetch.apply(FetchSettings::default());
        assert_eq!(settings.max_retries, 1);
        assert_eq!(settings.base_backoff, Duration::from_millis(5));
    }
}
