use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, Rgba};
use imageproc::drawing::draw_text_mut;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_OUTPUT_SUBDIR: &str = "processed/text";
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_text";

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("source image {0} does not exist")]
    NotFound(PathBuf),
    #[error("{0} is not a plain file name")]
    InvalidName(String),
    #[error("cannot tell the image format of {0}")]
    UnknownFormat(PathBuf),
    #[error("invalid font: {0}")]
    Font(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("annotation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Produces a processed copy of an uploaded image.
pub trait ImageAnnotator: Send + Sync {
    /// Writes the annotated copy and returns its path. `source` is left untouched.
    fn annotate(&self, source: &Path) -> Result<PathBuf, AnnotateError>;
}

/// Resolves an uploaded file name against the upload directory. Names that
/// would escape it are rejected.
pub fn source_path(upload_dir: &Path, file_name: &str) -> Result<PathBuf, AnnotateError> {
    let name = Path::new(file_name);
    let plain = name
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if file_name.is_empty() || !plain {
        return Err(AnnotateError::InvalidName(file_name.to_owned()));
    }
    Ok(upload_dir.join(name))
}

/// `<dir>/cat.png` becomes `<dir>/<subdir>/cat<suffix>.png`.
pub fn annotated_path(source: &Path, subdir: &Path, suffix: &str) -> PathBuf {
    let dir = source.parent().unwrap_or_else(|| Path::new("")).join(subdir);

    let mut name = OsString::from(source.file_stem().unwrap_or_default());
    name.push(suffix);
    if let Some(extension) = source.extension() {
        name.push(".");
        name.push(extension);
    }
    dir.join(name)
}

/// Decodes the source image, along with the format it has to be written back in.
pub fn open_source(source: &Path) -> Result<(DynamicImage, ImageFormat), AnnotateError> {
    let reader = match ImageReader::open(source) {
        Ok(reader) => reader,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(AnnotateError::NotFound(source.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    let reader = reader.with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| AnnotateError::UnknownFormat(source.to_path_buf()))?;

    Ok((reader.decode()?, format))
}

/// Writes the file name, without its extension, in the top-left corner.
pub struct TextAnnotator {
    font: FontVec,
    scale: PxScale,
    output_subdir: PathBuf,
    suffix: String,
}

impl TextAnnotator {
    pub fn new(font: FontVec, size: f32) -> Self {
        Self {
            font,
            scale: PxScale::from(size),
            output_subdir: PathBuf::from(DEFAULT_OUTPUT_SUBDIR),
            suffix: DEFAULT_OUTPUT_SUFFIX.to_owned(),
        }
    }

    pub fn from_font_file(path: impl AsRef<Path>, size: f32) -> Result<Self, AnnotateError> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| AnnotateError::Font(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(font, size))
    }

    pub fn with_output(mut self, subdir: impl Into<PathBuf>, suffix: &str) -> Self {
        self.output_subdir = subdir.into();
        self.suffix = suffix.to_owned();
        self
    }

    fn draw_label(&self, image: DynamicImage, label: &str) -> DynamicImage {
        if image.color().has_alpha() {
            let mut canvas = image.into_rgba8();
            let white = Rgba([255, 255, 255, 255]);
            draw_text_mut(&mut canvas, white, 0, 0, self.scale, &self.font, label);
            DynamicImage::ImageRgba8(canvas)
        } else {
            let mut canvas = image.into_rgb8();
            let white = Rgb([255, 255, 255]);
            draw_text_mut(&mut canvas, white, 0, 0, self.scale, &self.font, label);
            DynamicImage::ImageRgb8(canvas)
        }
    }
}

impl ImageAnnotator for TextAnnotator {
    fn annotate(&self, source: &Path) -> Result<PathBuf, AnnotateError> {
        let (image, format) = open_source(source)?;
        let label = source.file_stem().unwrap_or_default().to_string_lossy();

        let output = annotated_path(source, &self.output_subdir, &self.suffix);
        if let Some(dir) = output.parent() {
            fs::create_dir_all(dir)?;
        }

        self.draw_label(image, &label)
            .save_with_format(&output, format)?;
        debug!("wrote {} from {}", output.display(), source.display());

        Ok(output)
    }
}
