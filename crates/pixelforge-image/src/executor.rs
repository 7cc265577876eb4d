//! Transform executor backed by the `image` crate.

use std::fs::File;
use std::io::{BufWriter, ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use uuid::Uuid;

use pixelforge_core::config::storage::StorageConfig;
use pixelforge_core::error::{AppError, ErrorKind};
use pixelforge_core::result::AppResult;
use pixelforge_core::traits::transform::{TransformExecutor, TransformOutput};
use pixelforge_core::types::params::{
    CompressParams, ConvertParams, CropParams, ResizeFit, ResizeParams,
};

/// Writes transform outputs into a single output directory.
#[derive(Debug, Clone)]
pub struct ImageTransformExecutor {
    output_dir: PathBuf,
}

impl ImageTransformExecutor {
    /// Create an executor writing into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Create an executor from the storage configuration.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.output_dir)
    }

    /// Output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run `work` on the blocking pool with an owned input path.
    async fn blocking<F>(&self, input: &Path, work: F) -> AppResult<TransformOutput>
    where
        F: FnOnce(Job) -> AppResult<TransformOutput> + Send + 'static,
    {
        let job = Job {
            input: input.to_path_buf(),
            output_dir: self.output_dir.clone(),
        };
        let output = tokio::task::spawn_blocking(move || work(job))
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Internal, "Image task panicked", e))??;

        tracing::debug!(
            input = %input.display(),
            output = %output.output_path.display(),
            original_size = output.original_size,
            output_size = output.output_size,
            "Image transform finished"
        );
        Ok(output)
    }
}

/// Input and destination of one transform, owned by the blocking task.
struct Job {
    input: PathBuf,
    output_dir: PathBuf,
}

impl Job {
    fn load(&self) -> AppResult<(DynamicImage, u64)> {
        let size = std::fs::metadata(&self.input)
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Cannot read {}: {e}", self.input.display()),
                    e,
                )
            })?
            .len();
        let img = image::open(&self.input)
            .map_err(|e| AppError::internal(format!("Failed to decode image: {e}")))?;
        Ok((img, size))
    }

    /// Format of the input, from its extension.
    fn input_format(&self) -> Option<ImageFormat> {
        ImageFormat::from_path(&self.input).ok()
    }

    fn output_path(&self, format: ImageFormat) -> PathBuf {
        let stem = self
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let suffix = Uuid::new_v4().simple().to_string();
        let ext = format.extensions_str().first().copied().unwrap_or("bin");
        self.output_dir
            .join(format!("{stem}-{}.{ext}", &suffix[..8]))
    }

    /// Encode `img` as `format` and describe the written file.
    fn write(
        &self,
        img: &DynamicImage,
        format: ImageFormat,
        quality: Option<u8>,
        original_size: u64,
    ) -> AppResult<TransformOutput> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Cannot create {}: {e}", self.output_dir.display()),
                e,
            )
        })?;

        let path = self.output_path(format);
        let file = File::create(&path).map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Cannot create {}: {e}", path.display()),
                e,
            )
        })?;
        let mut writer = BufWriter::new(file);

        let encoded = match format {
            ImageFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut writer, quality.unwrap_or(80));
                DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)
            }
            ImageFormat::Png => {
                let encoder = PngEncoder::new_with_quality(
                    &mut writer,
                    CompressionType::Best,
                    PngFilter::Adaptive,
                );
                img.write_with_encoder(encoder)
            }
            other => img.write_to(&mut writer, other),
        };
        encoded.map_err(|e| AppError::internal(format!("Failed to encode {format:?}: {e}")))?;
        writer.flush()?;

        let output_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let (width, height) = img.dimensions();

        Ok(TransformOutput {
            output_path: path,
            original_size,
            output_size,
            width: Some(width),
            height: Some(height),
            format: format.extensions_str().first().map(|e| e.to_string()),
        })
    }
}

fn parse_format(name: &str) -> AppResult<ImageFormat> {
    ImageFormat::from_extension(name.trim().to_ascii_lowercase())
        .filter(|f| f.can_write())
        .ok_or_else(|| AppError::validation(format!("Unsupported output format '{name}'")))
}

/// Fill a missing dimension from the image's aspect ratio.
fn target_box(img: &DynamicImage, params: &ResizeParams) -> (u32, u32) {
    let (w, h) = img.dimensions();
    let scale = |value: u32, num: u32, den: u32| -> u32 {
        ((u64::from(value) * u64::from(num)) / u64::from(den.max(1))).max(1) as u32
    };
    match (params.width, params.height) {
        (Some(width), Some(height)) => (width, height),
        (Some(width), None) => (width, scale(width, h, w)),
        (None, Some(height)) => (scale(height, w, h), height),
        (None, None) => (w, h),
    }
}

#[async_trait]
impl TransformExecutor for ImageTransformExecutor {
    async fn compress(&self, input: &Path, params: &CompressParams) -> AppResult<TransformOutput> {
        let quality = params.quality;
        self.blocking(input, move |job| {
            let (img, size) = job.load()?;
            // PNG stays lossless at maximum compression; everything else becomes JPEG.
            let format = match job.input_format() {
                Some(ImageFormat::Png) => ImageFormat::Png,
                _ => ImageFormat::Jpeg,
            };
            job.write(&img, format, Some(quality), size)
        })
        .await
    }

    async fn resize(&self, input: &Path, params: &ResizeParams) -> AppResult<TransformOutput> {
        let params = *params;
        self.blocking(input, move |job| {
            let (img, size) = job.load()?;
            let (width, height) = target_box(&img, &params);
            let resized = match params.fit {
                ResizeFit::Inside => img.resize(width, height, FilterType::Lanczos3),
                ResizeFit::Cover => img.resize_to_fill(width, height, FilterType::Lanczos3),
                ResizeFit::Fill => img.resize_exact(width, height, FilterType::Lanczos3),
            };
            let format = job.input_format().filter(|f| f.can_write()).unwrap_or(ImageFormat::Png);
            job.write(&resized, format, None, size)
        })
        .await
    }

    async fn convert(&self, input: &Path, params: &ConvertParams) -> AppResult<TransformOutput> {
        let format = parse_format(&params.format)?;
        let quality = params.quality;
        self.blocking(input, move |job| {
            let (img, size) = job.load()?;
            job.write(&img, format, quality, size)
        })
        .await
    }

    async fn crop(&self, input: &Path, params: &CropParams) -> AppResult<TransformOutput> {
        let params = *params;
        self.blocking(input, move |job| {
            let (img, size) = job.load()?;
            let (w, h) = img.dimensions();
            let fits_x = params.x.checked_add(params.width).is_some_and(|right| right <= w);
            let fits_y = params.y.checked_add(params.height).is_some_and(|bottom| bottom <= h);
            if !fits_x || !fits_y {
                return Err(AppError::validation(format!(
                    "Crop rectangle {}x{}+{}+{} exceeds image bounds {w}x{h}",
                    params.width, params.height, params.x, params.y
                )));
            }
            let cropped = img.crop_imm(params.x, params.y, params.width, params.height);
            let format = job.input_format().filter(|f| f.can_write()).unwrap_or(ImageFormat::Png);
            job.write(&cropped, format, None, size)
        })
        .await
    }

    async fn cleanup(&self, path: &Path) -> AppResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed input artifact");
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to remove {}: {e}", path.display()),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn sample(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 5 % 256) as u8, (y * 7 % 256) as u8, ((x + y) % 256) as u8])
        });
        let path = dir.path().join(name);
        img.save(&path).unwrap();
        path
    }

    fn executor(dir: &TempDir) -> ImageTransformExecutor {
        ImageTransformExecutor::new(dir.path().join("output"))
    }

    #[tokio::test]
    async fn test_compress_jpeg_reports_sizes() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "photo.jpg", 64, 48);

        let output = executor(&dir)
            .compress(&input, &CompressParams { quality: 30 })
            .await
            .unwrap();

        assert!(output.output_path.starts_with(dir.path().join("output")));
        assert!(output.output_path.to_string_lossy().contains("photo-"));
        assert_eq!(output.format.as_deref(), Some("jpg"));
        assert!(output.original_size > 0);
        assert!(output.output_size > 0);
        assert_eq!((output.width, output.height), (Some(64), Some(48)));
    }

    #[tokio::test]
    async fn test_resize_keeps_aspect_ratio_inside() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "wide.png", 80, 40);

        let output = executor(&dir)
            .resize(
                &input,
                &ResizeParams {
                    width: Some(20),
                    height: None,
                    fit: ResizeFit::Inside,
                },
            )
            .await
            .unwrap();
        assert_eq!((output.width, output.height), (Some(20), Some(10)));
    }

    #[tokio::test]
    async fn test_resize_fill_stretches() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "wide.png", 80, 40);

        let output = executor(&dir)
            .resize(
                &input,
                &ResizeParams {
                    width: Some(30),
                    height: Some(30),
                    fit: ResizeFit::Fill,
                },
            )
            .await
            .unwrap();
        assert_eq!((output.width, output.height), (Some(30), Some(30)));
    }

    #[tokio::test]
    async fn test_convert_changes_extension() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "icon.png", 16, 16);

        let output = executor(&dir)
            .convert(
                &input,
                &ConvertParams {
                    format: "jpeg".to_string(),
                    quality: Some(90),
                },
            )
            .await
            .unwrap();
        assert_eq!(output.output_path.extension().unwrap(), "jpg");

        let unknown = executor(&dir)
            .convert(
                &input,
                &ConvertParams {
                    format: "psd".to_string(),
                    quality: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(unknown.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_crop_checks_bounds() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "square.png", 32, 32);
        let exec = executor(&dir);

        let output = exec
            .crop(
                &input,
                &CropParams {
                    x: 8,
                    y: 8,
                    width: 16,
                    height: 8,
                },
            )
            .await
            .unwrap();
        assert_eq!((output.width, output.height), (Some(16), Some(8)));

        let err = exec
            .crop(
                &input,
                &CropParams {
                    x: 24,
                    y: 0,
                    width: 16,
                    height: 8,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_missing_input_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let err = executor(&dir)
            .compress(&dir.path().join("nope.jpg"), &CompressParams { quality: 80 })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Storage);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "gone.png", 4, 4);
        let exec = executor(&dir);

        exec.cleanup(&input).await.unwrap();
        assert!(!input.exists());
        exec.cleanup(&input).await.unwrap();
    }
}
