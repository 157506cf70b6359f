//! Shared domain enumerations aligned with persisted database values.

use serde::{Deserialize, Serialize};

/// Kind of owning document a job renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Resume,
    Template,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Resume => "resume",
            ResourceKind::Template => "template",
        }
    }

    /// Plural path segment used by the HTTP surfaces (`/resumes/{id}`, `/templates/{id}`).
    pub fn path_segment(self) -> &'static str {
        match self {
            ResourceKind::Resume => "resumes",
            ResourceKind::Template => "templates",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "resumes" => Some(ResourceKind::Resume),
            "templates" => Some(ResourceKind::Template),
            _ => None,
        }
    }

    /// Artifact slot served by the download endpoints for this kind.
    pub fn download_slot(self) -> ArtifactSlot {
        match self {
            ResourceKind::Resume => ArtifactSlot::Pdf,
            ResourceKind::Template => ArtifactSlot::Preview,
        }
    }
}

impl TryFrom<&str> for ResourceKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, ()> {
        match value {
            "resume" => Ok(ResourceKind::Resume),
            "template" => Ok(ResourceKind::Template),
            _ => Err(()),
        }
    }
}

/// Where on the owning record a rendered artifact is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSlot {
    Pdf,
    Preview,
}

impl ArtifactSlot {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactSlot::Pdf => "pdf",
            ArtifactSlot::Preview => "jpg",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactSlot::Pdf => "application/pdf",
            ArtifactSlot::Preview => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ResumePdf,
    ResumePreview,
    TemplatePreview,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::ResumePdf => "resume_pdf",
            JobType::ResumePreview => "resume_preview",
            JobType::TemplatePreview => "template_preview",
        }
    }

    pub fn resource(self) -> ResourceKind {
        match self {
            JobType::ResumePdf | JobType::ResumePreview => ResourceKind::Resume,
            JobType::TemplatePreview => ResourceKind::Template,
        }
    }

    pub fn slot(self) -> ArtifactSlot {
        match self {
            JobType::ResumePdf => ArtifactSlot::Pdf,
            JobType::ResumePreview | JobType::TemplatePreview => ArtifactSlot::Preview,
        }
    }

    /// Job type producing `slot` for `resource`, if that combination exists.
    pub fn for_output(resource: ResourceKind, slot: ArtifactSlot) -> Option<Self> {
        match (resource, slot) {
            (ResourceKind::Resume, ArtifactSlot::Pdf) => Some(JobType::ResumePdf),
            (ResourceKind::Resume, ArtifactSlot::Preview) => Some(JobType::ResumePreview),
            (ResourceKind::Template, ArtifactSlot::Preview) => Some(JobType::TemplatePreview),
            (ResourceKind::Template, ArtifactSlot::Pdf) => None,
        }
    }
}

/// Generation status stored on the owning document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Idle,
    Processing,
    Completed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Idle => "idle",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Error => "error",
        }
    }
}

impl TryFrom<&str> for DocumentStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, ()> {
        match value {
            "idle" => Ok(DocumentStatus::Idle),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "error" => Ok(DocumentStatus::Error),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_have_no_pdf_output() {
        assert_eq!(
            JobType::for_output(ResourceKind::Template, ArtifactSlot::Pdf),
            None
        );
        assert_eq!(
            JobType::for_output(ResourceKind::Resume, ArtifactSlot::Pdf),
            Some(JobType::ResumePdf)
        );
    }

    #[test]
    fn path_segments_map_to_kinds() {
        assert_eq!(
            ResourceKind::from_path_segment("resumes"),
            Some(ResourceKind::Resume)
        );
        assert_eq!(ResourceKind::from_path_segment("resume"), None);
    }

    #[test]
    fn stored_statuses_parse_back() {
        for status in [
            DocumentStatus::Idle,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Error,
        ] {
            assert_eq!(DocumentStatus::try_from(status.as_str()), Ok(status));
        }
        assert_eq!(DocumentStatus::try_from("queued"), Err(()));
    }
}
