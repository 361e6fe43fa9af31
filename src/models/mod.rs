mod catalog;
mod registry;

pub use catalog::{
    descriptor, CostTier, InputSize, ModelDescriptor, ModelId, Normalization, BIREFNET_PORTRAIT,
    MODNET, RVM_MOBILENETV3, U2NET_HUMAN,
};
pub use registry::{DirectoryDiscovery, ModelDiscovery, ModelRegistry, ResolvedModel};
