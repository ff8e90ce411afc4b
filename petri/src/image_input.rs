//! Input discovery and image ingestion.
//!
//! Sources given on the command line may be image files, directories or glob
//! patterns. Pipeline stages never see those strings: every raster enters
//! through [`FrameSource`], which resolves either a path or an in-memory
//! image into one canonical `RgbImage`.

use anyhow::{anyhow, bail, Context, Result};
use image::{DynamicImage, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};

use crate::color_utils::symbols;

/// Configuration for input collection behavior
#[derive(Debug, Clone)]
pub struct ImageInputConfig {
    pub require_glob_matches: bool,
    pub strict_mode: bool,
}

impl Default for ImageInputConfig {
    fn default() -> Self {
        Self::strict()
    }
}

impl ImageInputConfig {
    /// Unsupported or missing inputs are errors
    pub fn strict() -> Self {
        Self {
            strict_mode: true,
            require_glob_matches: true,
        }
    }

    /// Unsupported or missing inputs are logged and skipped
    pub fn permissive() -> Self {
        Self {
            strict_mode: false,
            require_glob_matches: false,
        }
    }

    pub fn from_strict_flag(strict: bool) -> Self {
        if strict {
            Self::strict()
        } else {
            Self::permissive()
        }
    }
}

/// Supports: jpg, jpeg, png, webp, bmp, tiff, tif (case-insensitive)
pub fn is_supported_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            matches!(
                ext.to_string_lossy().to_lowercase().as_str(),
                "jpg" | "jpeg" | "png" | "webp" | "bmp" | "tiff" | "tif"
            )
        })
        .unwrap_or(false)
}

fn looks_like_glob(source: &str) -> bool {
    source.contains('*') || source.contains('?') || source.contains('[')
}

/// All image files directly inside `dir_path`, in lexicographic path order
pub fn find_images_in_directory(dir_path: &Path) -> Result<Vec<PathBuf>> {
    let mut image_files = Vec::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to list directory {}", dir_path.display()))?
    {
        let path = entry?.path();
        if path.is_file() && is_supported_image_file(&path) {
            image_files.push(path);
        }
    }

    image_files.sort();
    Ok(image_files)
}

/// Report a missing or unusable source: an error in strict mode, a warning otherwise.
fn reject_source(config: &ImageInputConfig, message: String) -> Result<()> {
    if config.strict_mode {
        Err(anyhow!(message))
    } else {
        log::warn!("{}{}", symbols::warning(), message);
        Ok(())
    }
}

/// Collect image files from files, directories and glob patterns.
/// The result is sorted and free of duplicates.
pub fn collect_images_from_sources(
    sources: &[String],
    config: &ImageInputConfig,
) -> Result<Vec<PathBuf>> {
    let mut all_image_files = Vec::new();

    for source in sources {
        let source_path = Path::new(source);

        if source_path.is_file() {
            if is_supported_image_file(source_path) {
                all_image_files.push(source_path.to_path_buf());
            } else {
                reject_source(
                    config,
                    format!(
                        "File is not a supported image format: {}",
                        source_path.display()
                    ),
                )?;
            }
        } else if source_path.is_dir() {
            all_image_files.extend(find_images_in_directory(source_path)?);
        } else if !looks_like_glob(source) {
            reject_source(config, format!("File does not exist: {source}"))?;
        } else {
            let paths = match glob::glob(source) {
                Ok(paths) => paths,
                Err(_) => {
                    reject_source(
                        config,
                        format!("Source path does not exist and is not a valid glob pattern: {source}"),
                    )?;
                    continue;
                }
            };

            let mut found_any = false;
            for path_result in paths {
                match path_result {
                    Ok(path) if path.is_file() && is_supported_image_file(&path) => {
                        all_image_files.push(path);
                        found_any = true;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!(
                            "{}Error reading path in glob {source}: {e}",
                            symbols::warning()
                        );
                    }
                }
            }
            if !found_any && config.require_glob_matches {
                bail!("No image files found matching pattern: {}", source);
            }
        }
    }

    all_image_files.sort();
    all_image_files.dedup();

    if all_image_files.is_empty() && config.strict_mode {
        bail!("No image files found in the specified sources");
    }

    Ok(all_image_files)
}

/// Collect the directories named by `sources`, each one a separate time-lapse run.
///
/// Glob patterns may select several directories. Anything that is not a
/// directory is rejected according to `config`.
pub fn collect_run_directories(
    sources: &[String],
    config: &ImageInputConfig,
) -> Result<Vec<PathBuf>> {
    let mut directories = Vec::new();

    for source in sources {
        let source_path = Path::new(source);
        if source_path.is_dir() {
            directories.push(source_path.to_path_buf());
        } else if looks_like_glob(source) {
            let matched: Vec<PathBuf> = glob::glob(source)
                .map(|paths| paths.flatten().filter(|p| p.is_dir()).collect())
                .unwrap_or_default();
            if matched.is_empty() {
                reject_source(config, format!("No directories match pattern: {source}"))?;
            }
            directories.extend(matched);
        } else if source_path.exists() {
            reject_source(
                config,
                format!("Time-lapse input must be a directory: {source}"),
            )?;
        } else {
            reject_source(config, format!("Directory does not exist: {source}"))?;
        }
    }

    directories.sort();
    directories.dedup();

    if directories.is_empty() && config.strict_mode {
        bail!("No time-lapse directories found in the specified sources");
    }

    Ok(directories)
}

/// An image handed to the pipeline: a file to decode, or a raster already in memory
#[derive(Debug, Clone)]
pub enum FrameSource {
    Path(PathBuf),
    Raster(DynamicImage),
}

impl FrameSource {
    /// Short description for log messages
    pub fn describe(&self) -> String {
        match self {
            FrameSource::Path(path) => path.display().to_string(),
            FrameSource::Raster(image) => {
                format!("in-memory {}x{} raster", image.width(), image.height())
            }
        }
    }

    /// Produce the canonical RGB raster.
    ///
    /// Fails when the path is not a readable image file, or when the raster
    /// does not have the `expected` dimensions.
    pub fn resolve(self, expected: Option<(u32, u32)>) -> Result<RgbImage> {
        let image = match self {
            FrameSource::Path(path) => {
                if !path.is_file() {
                    bail!("Not an image file: {}", path.display());
                }
                if !is_supported_image_file(&path) {
                    bail!("Unsupported image format: {}", path.display());
                }
                image::open(&path)
                    .with_context(|| format!("Failed to decode image {}", path.display()))?
                    .to_rgb8()
            }
            FrameSource::Raster(image) => image.to_rgb8(),
        };

        let dims = image.dimensions();
        if dims.0 == 0 || dims.1 == 0 {
            bail!("Image has no pixels");
        }
        if let Some(expected) = expected {
            if dims != expected {
                bail!(
                    "Image is {}x{} but the sequence is {}x{}",
                    dims.0,
                    dims.1,
                    expected.0,
                    expected.1
                );
            }
        }
        Ok(image)
    }
}

impl From<PathBuf> for FrameSource {
    fn from(path: PathBuf) -> Self {
        FrameSource::Path(path)
    }
}

impl From<&Path> for FrameSource {
    fn from(path: &Path) -> Self {
        FrameSource::Path(path.to_path_buf())
    }
}

impl From<DynamicImage> for FrameSource {
    fn from(image: DynamicImage) -> Self {
        FrameSource::Raster(image)
    }
}

impl From<RgbImage> for FrameSource {
    fn from(image: RgbImage) -> Self {
        FrameSource::Raster(DynamicImage::ImageRgb8(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    #[test]
    fn test_is_supported_image_file() {
        for name in ["a.jpg", "a.jpeg", "a.png", "a.webp", "a.bmp", "a.tiff", "a.tif", "A.JPG"] {
            assert!(is_supported_image_file(Path::new(name)), "{name}");
        }
        assert!(!is_supported_image_file(Path::new("test.txt")));
        assert!(!is_supported_image_file(Path::new("test.gif")));
        assert!(!is_supported_image_file(Path::new("test")));
    }

    #[test]
    fn test_find_images_in_directory_is_sorted() {
        let temp_dir = tempdir().unwrap();
        let dir_path = temp_dir.path();
        fs::write(dir_path.join("01.01.2025-00.00.05.jpg"), b"fake").unwrap();
        fs::write(dir_path.join("01.01.2025-00.00.00.jpg"), b"fake").unwrap();
        fs::write(dir_path.join("notes.txt"), b"text").unwrap();

        let images = find_images_in_directory(dir_path).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["01.01.2025-00.00.00.jpg", "01.01.2025-00.00.05.jpg"]);
    }

    #[test]
    fn test_collect_images_strict_rejects_non_images() {
        let temp_dir = tempdir().unwrap();
        let image_path = temp_dir.path().join("test.jpg");
        let text_path = temp_dir.path().join("test.txt");
        fs::write(&image_path, b"fake").unwrap();
        fs::write(&text_path, b"text").unwrap();

        let config = ImageInputConfig::strict();
        let sources = vec![image_path.to_string_lossy().to_string()];
        assert_eq!(collect_images_from_sources(&sources, &config).unwrap().len(), 1);

        let sources = vec![text_path.to_string_lossy().to_string()];
        assert!(collect_images_from_sources(&sources, &config).is_err());
    }

    #[test]
    fn test_collect_images_permissive_skips_non_images() {
        let temp_dir = tempdir().unwrap();
        let image_path = temp_dir.path().join("test.jpg");
        let text_path = temp_dir.path().join("test.txt");
        fs::write(&image_path, b"fake").unwrap();
        fs::write(&text_path, b"text").unwrap();

        let sources = vec![
            image_path.to_string_lossy().to_string(),
            text_path.to_string_lossy().to_string(),
            temp_dir.path().join("missing.jpg").to_string_lossy().to_string(),
        ];
        let result = collect_images_from_sources(&sources, &ImageInputConfig::permissive());
        assert_eq!(result.unwrap().len(), 1);
    }

    #[test]
    fn test_collect_run_directories() {
        let temp_dir = tempdir().unwrap();
        let run_a = temp_dir.path().join("run_a");
        let run_b = temp_dir.path().join("run_b");
        fs::create_dir(&run_a).unwrap();
        fs::create_dir(&run_b).unwrap();
        let file = temp_dir.path().join("frame.jpg");
        fs::write(&file, b"fake").unwrap();

        let pattern = temp_dir.path().join("run_*").to_string_lossy().to_string();
        let dirs = collect_run_directories(&[pattern], &ImageInputConfig::strict()).unwrap();
        assert_eq!(dirs, vec![run_a.clone(), run_b]);

        let sources = vec![file.to_string_lossy().to_string()];
        assert!(collect_run_directories(&sources, &ImageInputConfig::strict()).is_err());

        let sources = vec![
            file.to_string_lossy().to_string(),
            run_a.to_string_lossy().to_string(),
        ];
        let dirs = collect_run_directories(&sources, &ImageInputConfig::permissive()).unwrap();
        assert_eq!(dirs, vec![run_a]);
    }

    #[test]
    fn test_frame_source_resolves_raster_and_checks_shape() {
        let raster = RgbImage::from_pixel(8, 6, Rgb([1, 2, 3]));
        let resolved = FrameSource::from(raster.clone()).resolve(Some((8, 6))).unwrap();
        assert_eq!(resolved, raster);

        let gray = DynamicImage::ImageLuma8(image::GrayImage::new(8, 6));
        assert_eq!(FrameSource::from(gray).resolve(None).unwrap().dimensions(), (8, 6));

        let err = FrameSource::from(raster).resolve(Some((6, 8))).unwrap_err();
        assert!(err.to_string().contains("8x6"));
    }

    #[test]
    fn test_frame_source_rejects_bad_paths() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("missing.png");
        assert!(FrameSource::from(missing.as_path()).resolve(None).is_err());

        let corrupt = temp_dir.path().join("corrupt.png");
        fs::write(&corrupt, b"not a png").unwrap();
        let err = FrameSource::from(corrupt).resolve(None).unwrap_err();
        assert!(err.to_string().contains("Failed to decode"));

        let text = temp_dir.path().join("notes.txt");
        fs::write(&text, b"hello").unwrap();
        assert!(FrameSource::from(text).resolve(None).is_err());
    }

    #[test]
    fn test_frame_source_reads_png() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("frame.png");
        RgbImage::from_pixel(5, 4, Rgb([9, 8, 7])).save(&path).unwrap();

        let image = FrameSource::from(path).resolve(Some((5, 4))).unwrap();
        assert_eq!(image.get_pixel(0, 0), &Rgb([9, 8, 7]));
    }
}
