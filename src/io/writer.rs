//! ONNX model writer
//!
//! Models are encoded completely before anything is written, and files are
//! replaced atomically, so a failed export never leaves partial output.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use prost::Message;
use tracing::debug;

use crate::error::ExportResult;
use crate::proto::ModelProto;

/// Encode an ONNX model to bytes
///
/// # Example
///
/// ```ignore
/// use trace2onnx::io::model_to_bytes;
///
/// let bytes = model_to_bytes(&model)?;
/// ```
pub fn model_to_bytes(model: &ModelProto) -> ExportResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(model.encoded_len());
    model.encode(&mut bytes)?;
    Ok(bytes)
}

/// Write an encoded model to a stream in one call
pub fn write_model<W: Write>(model: &ModelProto, mut writer: W) -> ExportResult<()> {
    let bytes = model_to_bytes(model)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Save an ONNX model to a file
///
/// The model is written to a temporary sibling and renamed into place.
///
/// # Example
///
/// ```ignore
/// use trace2onnx::io::save_model;
///
/// save_model(&model, "model.onnx")?;
/// ```
pub fn save_model<P: AsRef<Path>>(model: &ModelProto, path: P) -> ExportResult<()> {
    let path = path.as_ref();
    let bytes = model_to_bytes(model)?;
    let tmp = temporary_path(path);

    let written = File::create(&tmp).and_then(|file| {
        let mut writer = BufWriter::new(file);
        writer.write_all(&bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    });
    if let Err(e) = written.and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Size of an encoded model in bytes
pub fn model_size(model: &ModelProto) -> usize {
    model.encoded_len()
}
