use crate::error::ClassifyError;
use crate::models::classify_types::{ImageRef, PickOutcome};
use crate::services::collaborators::ImageSource;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif", "ico",
];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Terminal picker: one path or URL per line.
///
/// An empty line cancels the pick. End of input, or `:q`, cancels and marks
/// the source closed.
pub struct PromptSource<R> {
    lines: tokio::sync::Mutex<Lines<R>>,
    closed: AtomicBool,
}

impl PromptSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> PromptSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: tokio::sync::Mutex::new(reader.lines()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Next trimmed line, or `None` once input is exhausted.
    pub async fn read_line(&self) -> Result<Option<String>, ClassifyError> {
        let next = self
            .lines
            .lock()
            .await
            .next_line()
            .await
            .map_err(|e| ClassifyError::ImagePick(format!("Failed to read input: {}", e)))?;

        match next {
            Some(line) if line.trim() == ":q" => {
                self.closed.store(true, Ordering::Relaxed);
                Ok(None)
            }
            Some(line) => Ok(Some(line.trim().to_string())),
            None => {
                self.closed.store(true, Ordering::Relaxed);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ImageSource for PromptSource<R> {
    async fn pick_image(&self) -> Result<PickOutcome, ClassifyError> {
        let line = match self.read_line().await? {
            Some(line) => line,
            None => return Ok(PickOutcome::Cancelled),
        };

        // Terminals quote dragged-in paths
        let path = line.trim_matches(|c: char| c == '"' || c == '\'');
        if path.is_empty() {
            return Ok(PickOutcome::Cancelled);
        }
        Ok(PickOutcome::Selected(ImageRef::new(path)))
    }
}

/// Scripted picker that hands out a fixed list of images in order.
pub struct QueueSource {
    queue: Mutex<VecDeque<ImageRef>>,
}

impl QueueSource {
    pub fn new(images: impl IntoIterator<Item = ImageRef>) -> Self {
        Self {
            queue: Mutex::new(images.into_iter().collect()),
        }
    }

    /// Paths, URLs, and folders (expanded to the image files inside them).
    pub fn from_inputs(inputs: &[String]) -> Result<Self, ClassifyError> {
        let mut images = Vec::new();
        for input in inputs {
            let path = Path::new(input);
            if path.is_dir() {
                let found = list_image_files(path)?;
                if found.is_empty() {
                    tracing::warn!(folder = %path.display(), "no images found");
                }
                images.extend(found.iter().map(|p| ImageRef::from_path(p)));
            } else {
                images.push(ImageRef::new(input.clone()));
            }
        }
        Ok(Self::new(images))
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ImageSource for QueueSource {
    async fn pick_image(&self) -> Result<PickOutcome, ClassifyError> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| ClassifyError::ImagePick("Picker queue lock poisoned".to_string()))?;
        Ok(match queue.pop_front() {
            Some(image) => PickOutcome::Selected(image),
            None => PickOutcome::Cancelled,
        })
    }
}

pub fn list_image_files(folder: &Path) -> Result<Vec<PathBuf>, ClassifyError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder).follow_links(true) {
        let entry = entry.map_err(|e| {
            ClassifyError::ImagePick(format!("Cannot read folder {}: {}", folder.display(), e))
        })?;
        if entry.file_type().is_file() && is_image_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
