use quiver_engine::{EngineStats, ImageResult, LoadedFrom, PixelLayout};
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};

/// Result of loading one URI.
#[derive(Debug, Serialize)]
pub struct Outcome {
    pub uri: String,
    #[serde(flatten)]
    pub status: Status,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    Loaded {
        width: u32,
        height: u32,
        source_width: u32,
        source_height: u32,
        subsample: u32,
        layout: PixelLayout,
        from: LoadedFrom,
    },
    Failed {
        error: String,
        retryable: bool,
    },
}

impl Outcome {
    pub fn new(uri: impl Into<String>, result: &ImageResult) -> Self {
        let status = match result {
            Ok(loaded) => {
                let image = &loaded.image;
                Status::Loaded {
                    width: image.width(),
                    height: image.height(),
                    source_width: image.source_size().width,
                    source_height: image.source_size().height,
                    subsample: image.subsample(),
                    layout: image.layout(),
                    from: loaded.from,
                }
            }
            Err(e) => Status::Failed {
                error: e.to_string(),
                retryable: e.is_retryable(),
            },
        };
        Self {
            uri: uri.into(),
            status,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.status, Status::Loaded { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Status::Loaded {
                width,
                height,
                source_width,
                source_height,
                subsample,
                from,
                ..
            } => write!(
                f,
                "{}: {width}x{height} (source {source_width}x{source_height}, subsample {subsample}, from {from})",
                self.uri
            ),
            Status::Failed { error, .. } => write!(f, "{}: {error}", self.uri),
        }
    }
}

/// Everything printed at the end of a run.
#[derive(Debug, Serialize)]
pub struct Report {
    pub results: Vec<Outcome>,
    pub stats: EngineStats,
}

impl Report {
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.is_loaded()).count()
    }

    pub fn write_text(&self, out: &mut impl Write) -> io::Result<()> {
        for outcome in &self.results {
            writeln!(out, "{outcome}")?;
        }
        writeln!(out)?;
        writeln!(out, "{}", self.stats.memory.format_summary("memory cache"))?;
        match &self.stats.disk {
            Some(disk) => writeln!(out, "{}", disk.format_summary("disk cache"))?,
            None => writeln!(out, "disk cache: disabled")?,
        }
        writeln!(
            out,
            "tasks: {} started, {} joined, {} jobs on {} workers",
            self.stats.tasks_started,
            self.stats.tasks_joined,
            self.stats.jobs_executed,
            self.stats.workers
        )
    }

    pub fn write_json(&self, out: &mut impl Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, self)?;
        writeln!(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_engine::{DecodedImage, Loaded, LoadError, FetchError};
    use std::sync::Arc;

    fn loaded() -> ImageResult {
        let image = DecodedImage::from_pixels(vec![0; 4 * 2 * 3], PixelLayout::Rgba8, 2, 3)
            .expect("buffer matches dimensions");
        Ok(Loaded {
            image: Arc::new(image),
            from: LoadedFrom::Source,
        })
    }

    #[test]
    fn test_loaded_line() {
        let outcome = Outcome::new("resource://a", &loaded());
        assert!(outcome.is_loaded());
        assert_eq!(
            outcome.to_string(),
            "resource://a: 2x3 (source 2x3, subsample 1, from source)"
        );
    }

    #[test]
    fn test_failed_line_and_json() {
        let err: ImageResult = Err(LoadError::Fetch(FetchError::Network("timeout".into())));
        let outcome = Outcome::new("https://x/a.png", &err);
        assert!(!outcome.is_loaded());
        assert!(outcome.to_string().starts_with("https://x/a.png: "));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["retryable"], true);
        assert_eq!(json["uri"], "https://x/a.png");
    }
}
