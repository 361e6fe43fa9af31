use super::catalog::{descriptor, ModelDescriptor, ModelId};
use crate::config::QualityTier;
use crate::inference::SessionPurpose;
use std::fmt;
use std::path::{Path, PathBuf};

/// Locates model weights by file name
pub trait ModelDiscovery: Send + Sync + fmt::Debug {
    fn locate(&self, file_name: &str) -> Option<PathBuf>;
}

/// Checks a list of directories, first hit wins
#[derive(Debug, Clone, Default)]
pub struct DirectoryDiscovery {
    roots: Vec<PathBuf>,
}

impl DirectoryDiscovery {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            roots: roots.into_iter().map(|p| p.as_ref().to_path_buf()).collect(),
        }
    }
}

impl ModelDiscovery for DirectoryDiscovery {
    fn locate(&self, file_name: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|root| root.join(file_name))
            .find(|candidate| candidate.is_file())
    }
}

/// A descriptor whose weights were found
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub descriptor: &'static ModelDescriptor,
    pub path: PathBuf,
}

/// Maps a purpose and quality request to the best model present
#[derive(Debug)]
pub struct ModelRegistry {
    discovery: Box<dyn ModelDiscovery>,
}

impl ModelRegistry {
    pub fn new(discovery: Box<dyn ModelDiscovery>) -> Self {
        Self { discovery }
    }

    pub fn from_dirs<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self::new(Box::new(DirectoryDiscovery::new(roots)))
    }

    /// Preference order, recommended model first and legacy last
    pub fn preference(purpose: SessionPurpose, quality: QualityTier) -> &'static [ModelId] {
        match (purpose, quality) {
            (SessionPurpose::Still, QualityTier::High) => &[
                ModelId::BiRefNetPortrait,
                ModelId::Modnet,
                ModelId::U2NetHuman,
            ],
            (SessionPurpose::Still, _) => &[
                ModelId::Modnet,
                ModelId::BiRefNetPortrait,
                ModelId::U2NetHuman,
            ],
            (SessionPurpose::LiveFallback, _) => &[ModelId::Modnet, ModelId::U2NetHuman],
            (SessionPurpose::Recurrent, _) => &[ModelId::RvmMobileNetV3],
        }
    }

    /// Best available model; `None` means the caller must pass through
    pub fn resolve(&self, purpose: SessionPurpose, quality: QualityTier) -> Option<ResolvedModel> {
        let resolved = Self::preference(purpose, quality).iter().find_map(|id| {
            let descriptor = descriptor(*id);
            self.discovery
                .locate(descriptor.file_name)
                .map(|path| ResolvedModel { descriptor, path })
        });

        match &resolved {
            Some(model) => tracing::debug!(
                "Resolved {} model {} at {}",
                purpose,
                model.descriptor.id,
                model.path.display()
            ),
            None => tracing::debug!("No {} model available", purpose),
        }

        resolved
    }

    pub fn has_recurrent(&self) -> bool {
        self.resolve(SessionPurpose::Recurrent, QualityTier::Medium)
            .is_some()
    }

    pub fn has_live_fallback(&self) -> bool {
        self.resolve(SessionPurpose::LiveFallback, QualityTier::Medium)
            .is_some()
    }

    pub fn has_any(&self) -> bool {
        [
            SessionPurpose::Still,
            SessionPurpose::LiveFallback,
            SessionPurpose::Recurrent,
        ]
        .into_iter()
        .any(|purpose| self.resolve(purpose, QualityTier::High).is_some())
    }
}
