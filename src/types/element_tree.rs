//! Navigable index over a flattened snapshot.
//!
//! A snapshot lists element definitions depth-first. Slices appear right
//! after their slicing entry with the same path and a `sliceName`, followed
//! by their own children. [`SchemaDocument`] recovers the parent/child/slice
//! relations once, when the definition enters the store.

use crate::error::{FhirValidatorError, Result};
use crate::types::structure_definition::{
    Cardinality, ElementDefinition, MaxCardinality, StructureDefinition, TypeRef,
    is_primitive_type,
};

/// How the validator treats the value(s) at an element position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    /// Children are defined inline in the snapshot (root, BackboneElement)
    Backbone,
    Primitive(String),
    /// A data type (or resource type) validated through its own definition
    /// unless the snapshot unrolls its children
    Complex(String),
    /// Any resource, dispatched on the instance's `resourceType`
    Resource,
    /// A polymorphic `name[x]` element
    Choice(Vec<TypeRef>),
    /// Same content as another element of this snapshot (`contentReference`)
    ContentReference(String),
}

impl ElementKind {
    fn classify(element: &ElementDefinition, is_root: bool) -> Self {
        if let Some(reference) = &element.content_reference {
            let target = reference
                .rsplit_once('#')
                .map(|(_, path)| path)
                .unwrap_or(reference);
            return Self::ContentReference(target.to_string());
        }

        let types = element.type_refs();
        if is_root || types.is_empty() {
            return Self::Backbone;
        }
        if types.len() > 1 || element.is_choice() {
            return Self::Choice(types.to_vec());
        }

        let code = types[0].code_name();
        match code {
            "BackboneElement" | "Element" => Self::Backbone,
            "Resource" | "DomainResource" => Self::Resource,
            c if is_primitive_type(c) => Self::Primitive(c.to_string()),
            c => Self::Complex(c.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElementNode {
    /// Position of the definition in the snapshot
    pub index: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub slices: Vec<usize>,
    /// Set on slice nodes: the slicing entry they belong to
    pub slice_of: Option<usize>,
    pub kind: ElementKind,
    pub cardinality: Cardinality,
    /// Instance JSON carries the element as an array. Follows the base
    /// definition, so profiles narrowing `max` keep the array shape.
    pub repeating: bool,
}

impl ElementNode {
    pub fn is_slice(&self) -> bool {
        self.slice_of.is_some()
    }
}

/// A StructureDefinition together with its element tree.
#[derive(Debug, Clone)]
pub struct SchemaDocument {
    definition: StructureDefinition,
    nodes: Vec<ElementNode>,
}

impl SchemaDocument {
    pub fn new(definition: StructureDefinition) -> Result<Self> {
        let nodes = build_nodes(&definition)?;
        Ok(Self { definition, nodes })
    }

    pub fn definition(&self) -> &StructureDefinition {
        &self.definition
    }

    pub fn url(&self) -> &str {
        &self.definition.url
    }

    pub fn version(&self) -> Option<&str> {
        self.definition.version.as_deref()
    }

    pub fn type_name(&self) -> &str {
        &self.definition.type_name
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn node(&self, id: usize) -> &ElementNode {
        &self.nodes[id]
    }

    pub fn element(&self, id: usize) -> &ElementDefinition {
        &self.definition.elements()[self.nodes[id].index]
    }

    pub fn children(&self, id: usize) -> &[usize] {
        &self.nodes[id].children
    }

    pub fn slices(&self, id: usize) -> &[usize] {
        &self.nodes[id].slices
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Child whose last path segment equals `name` exactly.
    pub fn child_named(&self, id: usize, name: &str) -> Option<usize> {
        self.children(id)
            .iter()
            .copied()
            .find(|&child| self.element(child).name() == name)
    }

    /// Child matching an instance key, following choice suffixes
    /// (`valueString` resolves to `value[x]`).
    pub fn child_for_key(&self, id: usize, key: &str) -> Option<usize> {
        self.child_named(id, key).or_else(|| {
            self.children(id).iter().copied().find(|&child| {
                let element = self.element(child);
                element
                    .name()
                    .strip_suffix("[x]")
                    .and_then(|base| key.strip_prefix(base))
                    .is_some_and(|suffix| suffix.starts_with(|c: char| c.is_ascii_uppercase()))
            })
        })
    }

    /// First non-slice node with the given path (target of `contentReference`).
    pub fn find_by_path(&self, path: &str) -> Option<usize> {
        (0..self.nodes.len()).find(|&id| {
            !self.nodes[id].is_slice() && self.element(id).path == path
        })
    }

    /// Slice name of a slice node.
    pub fn slice_name(&self, id: usize) -> Option<&str> {
        self.element(id).slice_name.as_deref()
    }
}

fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(parent, _)| parent)
}

fn build_nodes(definition: &StructureDefinition) -> Result<Vec<ElementNode>> {
    let elements = definition.elements();
    if elements.is_empty() {
        return Err(FhirValidatorError::invalid_schema(
            &definition.url,
            "snapshot is missing or empty",
        ));
    }
    if elements[0].path.contains('.') {
        return Err(FhirValidatorError::invalid_schema(
            &definition.url,
            format!("first snapshot element '{}' is not a root", elements[0].path),
        ));
    }

    let mut nodes: Vec<ElementNode> = Vec::with_capacity(elements.len());
    // Chain of open ancestors; the top is the most recent candidate parent
    let mut stack: Vec<usize> = Vec::new();

    for (index, element) in elements.iter().enumerate() {
        let cardinality = cardinality_of(definition, element)?;
        let repeating = base_max(definition, element)?
            .unwrap_or(cardinality.max)
            .is_repeating();
        let kind = ElementKind::classify(element, index == 0);
        let id = nodes.len();

        let mut node = ElementNode {
            index,
            parent: None,
            children: Vec::new(),
            slices: Vec::new(),
            slice_of: None,
            kind,
            cardinality,
            repeating,
        };

        if index == 0 {
            nodes.push(node);
            stack.push(id);
            continue;
        }

        if element.slice_name.is_some() {
            // A slice attaches to the nearest open slicing entry with its path
            while let Some(&top) = stack.last() {
                let top_element = &elements[nodes[top].index];
                if top_element.path == element.path && nodes[top].slice_of.is_none() {
                    break;
                }
                stack.pop();
            }
            let Some(&entry) = stack.last() else {
                return Err(FhirValidatorError::invalid_schema(
                    &definition.url,
                    format!(
                        "slice '{}' at '{}' has no preceding slicing entry",
                        element.slice_name.as_deref().unwrap_or_default(),
                        element.path
                    ),
                ));
            };
            node.slice_of = Some(entry);
            node.repeating = nodes[entry].repeating;
            node.parent = nodes[entry].parent;
            nodes[entry].slices.push(id);
        } else {
            let Some(expected_parent) = parent_path(&element.path) else {
                return Err(FhirValidatorError::invalid_schema(
                    &definition.url,
                    format!("second root element '{}'", element.path),
                ));
            };
            while let Some(&top) = stack.last() {
                if elements[nodes[top].index].path == expected_parent {
                    break;
                }
                stack.pop();
            }
            let Some(&parent) = stack.last() else {
                return Err(FhirValidatorError::invalid_schema(
                    &definition.url,
                    format!(
                        "element '{}' is out of order: parent '{expected_parent}' is not open",
                        element.path
                    ),
                ));
            };
            node.parent = Some(parent);
            nodes[parent].children.push(id);
        }

        nodes.push(node);
        stack.push(id);
    }

    Ok(nodes)
}

fn base_max(definition: &StructureDefinition, element: &ElementDefinition) -> Result<Option<MaxCardinality>> {
    let Some(max) = element.base.as_ref().and_then(|base| base.max.as_deref()) else {
        return Ok(None);
    };
    MaxCardinality::parse(max).map(Some).ok_or_else(|| {
        FhirValidatorError::invalid_schema(
            &definition.url,
            format!("invalid base max cardinality '{max}' at '{}'", element.path),
        )
    })
}

fn cardinality_of(definition: &StructureDefinition, element: &ElementDefinition) -> Result<Cardinality> {
    let max = match element.max.as_deref() {
        Some(max) => MaxCardinality::parse(max).ok_or_else(|| {
            FhirValidatorError::invalid_schema(
                &definition.url,
                format!("invalid max cardinality '{max}' at '{}'", element.path),
            )
        })?,
        None => MaxCardinality::Unbounded,
    };
    let cardinality = Cardinality {
        min: element.min.unwrap_or(0),
        max,
    };
    if let MaxCardinality::Bounded(max) = cardinality.max {
        if cardinality.min > max {
            return Err(FhirValidatorError::invalid_schema(
                &definition.url,
                format!("min {} exceeds max {max} at '{}'", cardinality.min, element.path),
            ));
        }
    }
    Ok(cardinality)
}
