pub mod element_tree;
pub mod structure_definition;
pub mod terminology;
pub mod version;

pub use element_tree::{ElementKind, ElementNode, SchemaDocument};
pub use structure_definition::{
    Binding, BindingStrength, Cardinality, Constraint, ConstraintSeverity, Discriminator,
    DiscriminatorKind, ElementDefinition, MaxCardinality, Slicing, SlicingRules, Snapshot,
    StructureDefinition, TypeRef, is_choice_type_suffix, is_primitive_type,
};
pub use terminology::{CodeSystem, Membership, TerminologySource, ValueSet};
pub use version::{SchemaVersion, split_canonical, version_rank};
