//! Format detection over a dataset root.

use std::path::Path;

use super::FormatRegistry;
use crate::error::LabelbridgeError;

/// Runs every registered detector against `root` and returns the single
/// matching format name.
///
/// # Errors
/// - [`LabelbridgeError::FormatAmbiguous`] if more than one detector
///   matches; all candidates are named, none is preferred.
/// - [`LabelbridgeError::FormatNotFound`] if none matches. Detectors that
///   recognised part of their signature contribute a reason.
pub fn detect_format(root: &Path, registry: &FormatRegistry) -> Result<String, LabelbridgeError> {
    if !root.is_dir() {
        return Err(LabelbridgeError::io_at(
            root,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "dataset root is not a directory",
            ),
        ));
    }

    let mut matches = Vec::new();
    let mut rejections = Vec::new();
    for plugin in registry.plugins() {
        match plugin.detector.detect(root) {
            Ok(true) => matches.push(plugin.name.clone()),
            Ok(false) => {}
            Err(err) => {
                log::debug!("detector '{}' rejected {}: {err}", plugin.name, root.display());
                rejections.push((plugin.name.clone(), err.to_string()));
            }
        }
    }

    match matches.len() {
        1 => {
            let name = matches.remove(0);
            log::info!("detected format '{name}' at {}", root.display());
            Ok(name)
        }
        0 => Err(LabelbridgeError::FormatNotFound {
            path: root.to_path_buf(),
            rejections,
        }),
        _ => Err(LabelbridgeError::FormatAmbiguous {
            path: root.to_path_buf(),
            candidates: matches,
        }),
    }
}
