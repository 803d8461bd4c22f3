use crate::codec::PartAssignment;
use crate::conversion::CancellationToken;

/// Options for reading a dataset.
#[derive(Clone, Debug, Default)]
pub struct ImportOptions {
    /// Abort on the first per-item content error instead of skipping the item.
    pub strict: bool,

    /// How part masks are attached to instances on decode.
    pub part_assignment: PartAssignment,
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn part_assignment(mut self, policy: PartAssignment) -> Self {
        self.part_assignment = policy;
        self
    }
}

/// Options for writing a dataset.
#[derive(Clone, Debug)]
pub struct ExportOptions {
    /// Copy media files next to the annotations.
    pub save_media: bool,

    /// Allow writing into a non-empty output directory.
    pub overwrite: bool,

    /// Abort on the first per-item error instead of collecting it.
    pub strict: bool,

    /// Worker threads for per-item work; `0` and `1` both mean sequential.
    pub jobs: usize,

    /// Also write one grayscale PNG per instance (mask-channel formats only).
    pub save_instance_masks: bool,

    /// Checked between items.
    pub cancel: Option<CancellationToken>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            save_media: false,
            overwrite: false,
            strict: false,
            jobs: 1,
            save_instance_masks: false,
            cancel: None,
        }
    }
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_media(mut self, save_media: bool) -> Self {
        self.save_media = save_media;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn save_instance_masks(mut self, save: bool) -> Self {
        self.save_instance_masks = save;
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
