pub mod bio;
pub mod encoder;
pub mod registry;

pub use bio::{BioTag, Entity, EntityCode, NER_ALPHABET, OUTSIDE, extract_entities};
pub use encoder::{LabelEncoder, LabelSource};
pub use registry::LabelRegistry;
