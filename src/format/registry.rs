//! Format registry: name -> (detector, extractor factory, converter factory).

use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::{io_ade20k, io_ir_json, io_tfod_csv};
use super::{ConverterFactory, Detector, ExtractorFactory};
use crate::error::LabelbridgeError;

/// The three components of one format.
pub struct FormatPlugin {
    pub name: String,
    pub detector: Box<dyn Detector>,
    pub extractor: Box<dyn ExtractorFactory>,
    pub converter: Box<dyn ConverterFactory>,
}

impl std::fmt::Debug for FormatPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatPlugin")
            .field("name", &self.name)
            .field("capabilities", &self.converter.capabilities())
            .finish()
    }
}

/// Table of registered formats.
///
/// Populated once, then only read. Iteration is in name order so that
/// listings and detection results are stable.
#[derive(Debug, Default)]
pub struct FormatRegistry {
    formats: BTreeMap<String, FormatPlugin>,
}

impl FormatRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in formats.
    ///
    /// # Errors
    /// Fails if two built-in formats share a name.
    pub fn try_with_builtins() -> Result<Self, LabelbridgeError> {
        let mut registry = Self::new();
        registry.register_builtins()?;
        Ok(registry)
    }

    /// Like [`try_with_builtins`](Self::try_with_builtins), for callers
    /// that cannot propagate errors. A name clash is a programming error:
    /// it panics in debug builds and yields an empty registry otherwise.
    pub fn with_builtins() -> Self {
        let registry = Self::try_with_builtins();
        debug_assert!(registry.is_ok(), "built-in format registration failed: {registry:?}");
        registry.unwrap_or_else(|err| {
            log::error!("built-in format registration failed: {err}");
            Self::new()
        })
    }

    /// Adds the built-in formats to this registry.
    ///
    /// # Errors
    /// Returns [`LabelbridgeError::DuplicateFormat`] if one of their names
    /// is already registered.
    pub fn register_builtins(&mut self) -> Result<(), LabelbridgeError> {
        self.register(
            io_ade20k::FORMAT_NAME,
            Box::new(io_ade20k::Ade20kDetector),
            Box::new(io_ade20k::Ade20kExtractorFactory),
            Box::new(io_ade20k::Ade20kConverterFactory),
        )?;
        self.register(
            io_ir_json::FORMAT_NAME,
            Box::new(io_ir_json::IrJsonDetector),
            Box::new(io_ir_json::IrJsonExtractorFactory),
            Box::new(io_ir_json::IrJsonConverterFactory),
        )?;
        self.register(
            io_tfod_csv::FORMAT_NAME,
            Box::new(io_tfod_csv::TfodDetector),
            Box::new(io_tfod_csv::TfodExtractorFactory),
            Box::new(io_tfod_csv::TfodConverterFactory),
        )
    }

    /// The process-wide registry of built-in formats.
    pub fn builtin() -> &'static FormatRegistry {
        static REGISTRY: OnceLock<FormatRegistry> = OnceLock::new();
        REGISTRY.get_or_init(FormatRegistry::with_builtins)
    }

    /// Registers a format.
    ///
    /// # Errors
    /// Returns [`LabelbridgeError::DuplicateFormat`] if `name` is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        detector: Box<dyn Detector>,
        extractor: Box<dyn ExtractorFactory>,
        converter: Box<dyn ConverterFactory>,
    ) -> Result<(), LabelbridgeError> {
        let name = name.into();
        if self.formats.contains_key(&name) {
            return Err(LabelbridgeError::DuplicateFormat(name));
        }
        log::debug!("registered format '{name}'");
        self.formats.insert(
            name.clone(),
            FormatPlugin {
                name,
                detector,
                extractor,
                converter,
            },
        );
        Ok(())
    }

    /// Looks up a format by name.
    ///
    /// # Errors
    /// Returns [`LabelbridgeError::UnknownFormat`] listing the known names.
    pub fn lookup(&self, name: &str) -> Result<&FormatPlugin, LabelbridgeError> {
        self.formats
            .get(name)
            .ok_or_else(|| LabelbridgeError::UnknownFormat {
                name: name.to_string(),
                available: self.list().into_iter().map(str::to_string).collect(),
            })
    }

    pub fn get(&self, name: &str) -> Option<&FormatPlugin> {
        self.formats.get(name)
    }

    /// Registered names in sorted order.
    pub fn list(&self) -> Vec<&str> {
        self.formats.keys().map(String::as_str).collect()
    }

    pub fn plugins(&self) -> impl Iterator<Item = &FormatPlugin> {
        self.formats.values()
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}
