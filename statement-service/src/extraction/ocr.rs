use crate::extraction::error::ExtractionError;
use crate::extraction::executor::{path_arg, CommandExecutor};
use async_trait::async_trait;
use image::imageops::FilterType;
use image::GenericImageView;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Pages narrower than this are upscaled before recognition.
pub const TARGET_WIDTH: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
}

impl FileKind {
    pub const ALLOWED_EXTENSIONS: [&'static str; 4] = ["pdf", "png", "jpg", "jpeg"];

    pub fn from_filename(filename: &str) -> Result<Self, ExtractionError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => Ok(FileKind::Pdf),
            "png" | "jpg" | "jpeg" => Ok(FileKind::Image),
            _ => Err(ExtractionError::UnsupportedFileType(filename.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Image => "image",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            FileKind::Pdf => &["pdf"],
            FileKind::Image => &["png", "jpg", "jpeg"],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OcrOutput {
    pub text: String,
    pub pages: usize,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, path: &Path, kind: FileKind) -> Result<OcrOutput, ExtractionError>;
}

#[derive(Debug, Clone)]
pub struct TesseractConfig {
    pub tesseract_cmd: String,
    pub pdftoppm_cmd: String,
    pub dpi: u32,
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub work_dir: PathBuf,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            tesseract_cmd: "tesseract".to_string(),
            pdftoppm_cmd: "pdftoppm".to_string(),
            dpi: 300,
            timeout: Duration::from_secs(120),
            max_concurrent: 2,
            work_dir: std::env::temp_dir(),
        }
    }
}

/// OCR via the `tesseract` and `pdftoppm` command line tools.
pub struct TesseractOcr {
    config: TesseractConfig,
    executor: CommandExecutor,
    permits: Arc<Semaphore>,
}

impl TesseractOcr {
    pub fn new(config: TesseractConfig) -> Self {
        let executor = CommandExecutor::new(config.timeout);
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            executor,
            permits,
        }
    }

    /// Rasterise every page of `pdf` into `out_dir`, returning the page images in order.
    async fn rasterise(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
        let dpi = self.config.dpi.to_string();
        let prefix = out_dir.join("page");

        self.executor
            .execute(
                &self.config.pdftoppm_cmd,
                &["-r", &dpi, "-png", path_arg(pdf)?, path_arg(&prefix)?],
                None,
            )
            .await?;

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "png") {
                pages.push(path);
            }
        }
        // pdftoppm zero-pads page numbers to the width of the page count
        pages.sort();
        Ok(pages)
    }

    async fn recognise(&self, image: &Path, scratch: &Path) -> Result<String, ExtractionError> {
        let prepared = preprocess(image.to_path_buf(), scratch.to_path_buf()).await?;
        let output = self
            .executor
            .execute(
                &self.config.tesseract_cmd,
                &[path_arg(&prepared)?, "stdout", "--oem", "3", "--psm", "6"],
                None,
            )
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run(&self, path: &Path, kind: FileKind, work: &Path) -> Result<OcrOutput, ExtractionError> {
        let pages = match kind {
            FileKind::Pdf => self.rasterise(path, work).await?,
            FileKind::Image => vec![path.to_path_buf()],
        };

        let mut texts = Vec::with_capacity(pages.len());
        for (idx, page) in pages.iter().enumerate() {
            let scratch = work.join(format!("prepared_{:04}.png", idx + 1));
            let text = self.recognise(page, &scratch).await?;
            tracing::debug!(page = idx + 1, chars = text.len(), "Page recognised");
            texts.push(text);
        }

        let text = texts.join("\n");
        if text.trim().is_empty() {
            return Err(ExtractionError::EmptyText);
        }

        Ok(OcrOutput {
            text,
            pages: pages.len(),
        })
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    #[tracing::instrument(skip(self), fields(kind = kind.as_str()))]
    async fn extract_text(&self, path: &Path, kind: FileKind) -> Result<OcrOutput, ExtractionError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ExtractionError::Io(std::io::Error::other(e)))?;

        let work = self.config.work_dir.join(format!("ocr_{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&work).await?;

        let result = self.run(path, kind, &work).await;

        if let Err(e) = tokio::fs::remove_dir_all(&work).await {
            tracing::warn!(error = %e, work_dir = ?work, "Failed to remove OCR work directory");
        }

        result
    }
}

/// Grayscale and upscale a page image off the async runtime, writing the result to `dest`.
pub async fn preprocess(source: PathBuf, dest: PathBuf) -> Result<PathBuf, ExtractionError> {
    tokio::task::spawn_blocking(move || -> Result<PathBuf, ExtractionError> {
        let img = image::open(&source)?;
        let (width, height) = img.dimensions();

        let gray = img.grayscale();
        let gray = if width > 0 && width < TARGET_WIDTH {
            let scaled_height = ((height as u64 * TARGET_WIDTH as u64) / width as u64).max(1) as u32;
            gray.resize_exact(TARGET_WIDTH, scaled_height, FilterType::Lanczos3)
        } else {
            gray
        };

        gray.save(&dest)?;
        Ok(dest)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn file_kind_from_extension() {
        assert_eq!(FileKind::from_filename("march.PDF").unwrap(), FileKind::Pdf);
        assert_eq!(FileKind::from_filename("scan.jpeg").unwrap(), FileKind::Image);
        assert_eq!(FileKind::from_filename("scan.png").unwrap(), FileKind::Image);
        assert!(matches!(
            FileKind::from_filename("notes.txt"),
            Err(ExtractionError::UnsupportedFileType(_))
        ));
        assert!(FileKind::from_filename("no_extension").is_err());
    }

    #[tokio::test]
    async fn preprocess_upscales_narrow_pages() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("page.png");
        let dest = dir.path().join("prepared.png");

        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(500, 250, Rgb([200, 10, 10]));
        img.save(&source).unwrap();

        let out = preprocess(source, dest.clone()).await.unwrap();
        assert_eq!(out, dest);

        let prepared = image::open(&dest).unwrap();
        assert_eq!(prepared.dimensions(), (TARGET_WIDTH, 1000));
        assert!(prepared.as_luma8().is_some());
    }

    #[tokio::test]
    async fn preprocess_keeps_wide_pages() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("wide.png");
        let dest = dir.path().join("prepared.png");

        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(2400, 100, Rgb([0, 0, 0]));
        img.save(&source).unwrap();

        preprocess(source, dest.clone()).await.unwrap();
        assert_eq!(image::open(&dest).unwrap().dimensions(), (2400, 100));
    }

    #[tokio::test]
    async fn missing_tesseract_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.png");
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(10, 10, Rgb([255, 255, 255]));
        img.save(&source).unwrap();

        let ocr = TesseractOcr::new(TesseractConfig {
            tesseract_cmd: "no-such-tesseract-binary".into(),
            work_dir: dir.path().to_path_buf(),
            ..Default::default()
        });

        let err = ocr.extract_text(&source, FileKind::Image).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Io(_)));
        // work directory cleaned up, only the source image remains
        let remaining = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(remaining, 1);
    }
}
