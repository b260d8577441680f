//! The fixed table of supported operations.
//!
//! Each [`Operation`] is a plain descriptor: which converter to run, how its
//! artifacts are named, how caller arguments are validated, and how the
//! argument list is built. The pipeline is identical for all four; anything
//! operation-specific lives here.

use crate::config::{ToolPaths, ToolSpec};
use crate::error::ServiceError;
use crate::pipeline::invoke::ToolCommand;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Upper bound (inclusive) for resize dimensions.
pub const MAX_DIMENSION: u32 = 10_000;

/// Target size used when a resize call does not specify one.
pub const DEFAULT_RESIZE: (u32, u32) = (800, 600);

// ── Arguments ────────────────────────────────────────────────────────────

/// Caller-supplied arguments as they arrive on the wire.
///
/// Signed so that zero and negative dimensions reach validation instead of
/// failing deserialisation with a less helpful message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
}

impl OperationArgs {
    pub fn format(format: impl Into<String>) -> Self {
        Self {
            format: Some(format.into()),
            ..Self::default()
        }
    }

    pub fn resize(width: i64, height: i64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }
}

/// Arguments after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedArgs {
    None,
    Format(ImageFormat),
    Resize {
        width: u32,
        height: u32,
        format: ImageFormat,
    },
}

/// Raster formats accepted as a conversion target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpg,
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
    Webp,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 7] = [
        ImageFormat::Jpg,
        ImageFormat::Jpeg,
        ImageFormat::Png,
        ImageFormat::Gif,
        ImageFormat::Bmp,
        ImageFormat::Tiff,
        ImageFormat::Webp,
    ];

    /// File extension, which is also how ImageMagick picks the output encoder.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.extension() == wanted)
            .ok_or_else(|| {
                ServiceError::InvalidArgument(format!(
                    "unsupported image format '{s}' (expected one of: jpg, jpeg, png, gif, bmp, tiff, webp)"
                ))
            })
    }
}

fn dimension(name: &str, value: i64) -> Result<u32, ServiceError> {
    if value <= 0 || value > i64::from(MAX_DIMENSION) {
        return Err(ServiceError::InvalidArgument(format!(
            "{name} must be in 1–{MAX_DIMENSION}, got {value}"
        )));
    }
    // In range, so the cast is lossless.
    Ok(value as u32)
}

// ── Operations ───────────────────────────────────────────────────────────

/// The four supported operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    CompressPdf,
    ConvertToText,
    ConvertImageFormat,
    ResizeImage,
}

impl OperationKind {
    /// Name of the remote method, as sent in the call header.
    pub fn method(self) -> &'static str {
        self.descriptor().method
    }

    pub fn descriptor(self) -> &'static Operation {
        match self {
            OperationKind::CompressPdf => &OPERATIONS[0],
            OperationKind::ConvertToText => &OPERATIONS[1],
            OperationKind::ConvertImageFormat => &OPERATIONS[2],
            OperationKind::ResizeImage => &OPERATIONS[3],
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// Which configured converter an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Ghostscript,
    PdfToText,
    ImageMagick,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::Ghostscript => "Ghostscript",
            Tool::PdfToText => "pdftotext",
            Tool::ImageMagick => "ImageMagick",
        }
    }

    fn spec(self, tools: &ToolPaths) -> &ToolSpec {
        match self {
            Tool::Ghostscript => &tools.ghostscript,
            Tool::PdfToText => &tools.pdftotext,
            Tool::ImageMagick => &tools.imagemagick,
        }
    }
}

type Validator = fn(&OperationArgs) -> Result<ResolvedArgs, ServiceError>;
type ArgBuilder = fn(&ResolvedArgs, &Path, &Path) -> Vec<OsString>;

/// Immutable description of one operation.
pub struct Operation {
    pub kind: OperationKind,
    pub method: &'static str,
    pub tool: Tool,
    pub input_prefix: &'static str,
    pub input_extension: &'static str,
    pub output_prefix: &'static str,
    /// Whether a zero-byte output still counts as a result.
    pub allow_empty_output: bool,
    validate: Validator,
    build_args: ArgBuilder,
    fixed_output_extension: Option<&'static str>,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .field("method", &self.method)
            .field("tool", &self.tool)
            .finish()
    }
}

impl Operation {
    /// Validate caller arguments. Performs no I/O.
    pub fn resolve(&self, args: &OperationArgs) -> Result<ResolvedArgs, ServiceError> {
        (self.validate)(args)
    }

    /// Extension of the output artifact for these arguments.
    pub fn output_extension(&self, args: &ResolvedArgs) -> &'static str {
        if let Some(ext) = self.fixed_output_extension {
            return ext;
        }
        match args {
            ResolvedArgs::Format(format) | ResolvedArgs::Resize { format, .. } => {
                format.extension()
            }
            ResolvedArgs::None => "bin",
        }
    }

    /// Materialise the converter invocation for one call.
    pub fn command(
        &self,
        tools: &ToolPaths,
        args: &ResolvedArgs,
        input: &Path,
        output: &Path,
    ) -> ToolCommand {
        let spec = self.tool.spec(tools);
        let mut argv = spec.leading_args.clone();
        argv.extend((self.build_args)(args, input, output));
        ToolCommand {
            tool: self.tool.name(),
            program: spec.program.clone(),
            args: argv,
            output: output.to_path_buf(),
        }
    }
}

/// Every supported operation, in [`OperationKind`] order.
pub static OPERATIONS: [Operation; 4] = [
    Operation {
        kind: OperationKind::CompressPdf,
        method: "CompressPDF",
        tool: Tool::Ghostscript,
        input_prefix: "input_pdf",
        input_extension: "pdf",
        output_prefix: "output_pdf",
        allow_empty_output: false,
        validate: no_args,
        build_args: ghostscript_args,
        fixed_output_extension: Some("pdf"),
    },
    Operation {
        kind: OperationKind::ConvertToText,
        method: "ConvertToTXT",
        tool: Tool::PdfToText,
        input_prefix: "input_pdf",
        input_extension: "pdf",
        output_prefix: "output_txt",
        // A PDF without a text layer legitimately yields an empty file.
        allow_empty_output: true,
        validate: no_args,
        build_args: in_out_args,
        fixed_output_extension: Some("txt"),
    },
    Operation {
        kind: OperationKind::ConvertImageFormat,
        method: "ConvertImageFormat",
        tool: Tool::ImageMagick,
        input_prefix: "input_img",
        input_extension: "tmp",
        output_prefix: "output_img",
        allow_empty_output: false,
        validate: image_format_args,
        build_args: in_out_args,
        fixed_output_extension: None,
    },
    Operation {
        kind: OperationKind::ResizeImage,
        method: "ResizeImage",
        tool: Tool::ImageMagick,
        input_prefix: "input_img",
        input_extension: "tmp",
        output_prefix: "output_img",
        allow_empty_output: false,
        validate: resize_args,
        build_args: resize_args_list,
        fixed_output_extension: None,
    },
];

/// Look an operation up by its wire method name.
pub fn lookup(method: &str) -> Option<&'static Operation> {
    OPERATIONS.iter().find(|op| op.method == method)
}

// ── Validators ───────────────────────────────────────────────────────────

fn no_args(_: &OperationArgs) -> Result<ResolvedArgs, ServiceError> {
    Ok(ResolvedArgs::None)
}

fn image_format_args(args: &OperationArgs) -> Result<ResolvedArgs, ServiceError> {
    let format = match args.format.as_deref() {
        Some(f) => f.parse()?,
        None => ImageFormat::Png,
    };
    Ok(ResolvedArgs::Format(format))
}

fn resize_args(args: &OperationArgs) -> Result<ResolvedArgs, ServiceError> {
    let width = dimension("width", args.width.unwrap_or(i64::from(DEFAULT_RESIZE.0)))?;
    let height = dimension("height", args.height.unwrap_or(i64::from(DEFAULT_RESIZE.1)))?;
    let format = match args.format.as_deref() {
        Some(f) => f.parse()?,
        None => ImageFormat::Jpg,
    };
    Ok(ResolvedArgs::Resize {
        width,
        height,
        format,
    })
}

// ── Argument templates ───────────────────────────────────────────────────

fn ghostscript_args(_: &ResolvedArgs, input: &Path, output: &Path) -> Vec<OsString> {
    // Ghostscript expands `%d`-style templates in OutputFile; `%%` is a literal percent.
    let out = output.as_os_str().to_string_lossy().replace('%', "%%");
    vec![
        "-sDEVICE=pdfwrite".into(),
        "-dCompatibilityLevel=1.4".into(),
        "-dPDFSETTINGS=/ebook".into(),
        "-dNOPAUSE".into(),
        "-dQUIET".into(),
        "-dBATCH".into(),
        format!("-sOutputFile={out}").into(),
        input.as_os_str().to_owned(),
    ]
}

fn in_out_args(_: &ResolvedArgs, input: &Path, output: &Path) -> Vec<OsString> {
    vec![input.as_os_str().to_owned(), output.as_os_str().to_owned()]
}

fn resize_args_list(args: &ResolvedArgs, input: &Path, output: &Path) -> Vec<OsString> {
    let geometry = match args {
        ResolvedArgs::Resize { width, height, .. } => format!("{width}x{height}!"),
        _ => format!("{}x{}!", DEFAULT_RESIZE.0, DEFAULT_RESIZE.1),
    };
    vec![
        input.as_os_str().to_owned(),
        "-resize".into(),
        geometry.into(),
        output.as_os_str().to_owned(),
    ]
}
