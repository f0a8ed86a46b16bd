//! Static model catalog and synthesis vocabulary

mod variant;

pub use variant::{
    parse_model_variant, Capability, Language, ModelVariant, Speaker,
};
