use clap::ValueEnum;
use finrag_retrieval::{BackendKind, Durability};
use finrag_vector_store::EmbeddingMode;

#[derive(Copy, Clone, ValueEnum)]
pub(crate) enum EmbedModeFlag {
    Onnx,
    Stub,
}

impl EmbedModeFlag {
    pub(crate) const fn as_domain(self) -> EmbeddingMode {
        match self {
            EmbedModeFlag::Onnx => EmbeddingMode::Onnx,
            EmbedModeFlag::Stub => EmbeddingMode::Stub,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
pub(crate) enum BackendFlag {
    Flat,
    Remote,
}

impl BackendFlag {
    pub(crate) const fn as_domain(self) -> BackendKind {
        match self {
            BackendFlag::Flat => BackendKind::Flat,
            BackendFlag::Remote => BackendKind::Remote,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
pub(crate) enum DurabilityFlag {
    BestEffort,
    Strict,
}

impl DurabilityFlag {
    pub(crate) const fn as_domain(self) -> Durability {
        match self {
            DurabilityFlag::BestEffort => Durability::BestEffort,
            DurabilityFlag::Strict => Durability::Strict,
        }
    }
}

pub(crate) fn parse_threshold_arg(raw: &str) -> Result<f32, String> {
    finrag_retrieval::parse_threshold(raw).map_err(|err| err.to_string())
}
