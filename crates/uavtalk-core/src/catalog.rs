//! Definition catalog
//!
//! Loads the XML schema directory, runs the normalization pipeline, hashes
//! each object's ObjectID, synthesizes Meta companions, and serves O(1)
//! lookups by id and (case-insensitive) name. The catalog is immutable
//! after load and shared across every task.

use crate::error::SchemaError;
use crate::objectid;
use crate::types::{Definition, FieldDefinition, FieldType, ObjectId, SHORT_HEADER_LENGTH};
use crate::xml::{self, RawField, RawObject};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// The loaded schema catalog.
#[derive(Debug)]
pub struct Catalog {
    definitions: Vec<Arc<Definition>>,
    by_id: HashMap<ObjectId, Arc<Definition>>,
    by_name: HashMap<String, Arc<Definition>>,
    max_object_length: usize,
}

impl Catalog {
    /// Load every definition file in a directory (non-recursive).
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut objects = Vec::with_capacity(paths.len());
        for path in &paths {
            let label = path.display().to_string();
            let text = std::fs::read_to_string(path)?;
            objects.push(xml::parse_object(&label, &text)?);
        }

        let catalog = Self::from_objects(objects)?;
        info!(
            definitions = catalog.len(),
            max_object_length = catalog.max_object_length,
            "definition catalog loaded"
        );
        Ok(catalog)
    }

    /// Build a catalog from parsed objects. Each primary is normalized,
    /// hashed, and paired with its synthesized Meta companion.
    pub fn from_objects(objects: Vec<RawObject>) -> Result<Self, SchemaError> {
        let mut catalog = Self {
            definitions: Vec::with_capacity(objects.len() * 2),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            max_object_length: 0,
        };

        for object in objects {
            let primary = normalize(object)?;
            let meta = synthesize_meta(&primary);
            debug!(name = %primary.name, id = %primary.object_id, "definition");
            catalog.insert(Arc::new(primary))?;
            catalog.insert(Arc::new(meta))?;
        }

        Ok(catalog)
    }

    fn insert(&mut self, definition: Arc<Definition>) -> Result<(), SchemaError> {
        if let Some(existing) = self.by_id.get(&definition.object_id) {
            return Err(SchemaError::DuplicateObjectId {
                id: definition.object_id,
                name: definition.name.clone(),
                existing: existing.name.clone(),
            });
        }

        let mut frame = definition.byte_length() + SHORT_HEADER_LENGTH;
        if !definition.single_instance {
            frame += 2;
        }
        self.max_object_length = self.max_object_length.max(frame);

        self.by_id.insert(definition.object_id, definition.clone());
        self.by_name
            .insert(definition.name.to_lowercase(), definition.clone());
        self.definitions.push(definition);
        Ok(())
    }

    pub fn by_id(&self, id: ObjectId) -> Option<&Arc<Definition>> {
        self.by_id.get(&id)
    }

    /// Case-insensitive name lookup.
    pub fn by_name(&self, name: &str) -> Option<&Arc<Definition>> {
        self.by_name.get(&name.to_lowercase())
    }

    /// All definitions (primaries and Metas) in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Definition>> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Largest possible frame body in this catalog: payload plus header
    /// plus instance id where applicable. The deframer uses this to reject
    /// impossible LENGTH fields.
    pub fn max_object_length(&self) -> usize {
        self.max_object_length
    }
}

/// Run the normalization pipeline on one parsed object.
///
/// Order matters: plain fields are resolved first, clones copy their
/// resolved sibling, the ObjectID is hashed over declaration order, and
/// only then are fields sorted into wire order.
fn normalize(object: RawObject) -> Result<Definition, SchemaError> {
    let mut resolved: Vec<Option<FieldDefinition>> = vec![None; object.fields.len()];

    for (slot, raw) in resolved.iter_mut().zip(&object.fields) {
        if raw.clone_of.is_empty() {
            *slot = Some(resolve_field(&object.name, raw)?);
        }
    }

    for (index, raw) in object.fields.iter().enumerate() {
        if raw.clone_of.is_empty() {
            continue;
        }
        let sibling = object
            .fields
            .iter()
            .position(|f| f.name == raw.clone_of)
            .and_then(|i| resolved[i].clone())
            .ok_or_else(|| SchemaError::UnknownClone {
                object: object.name.clone(),
                field: raw.name.clone(),
                clone_of: raw.clone_of.clone(),
            })?;
        let mut field = sibling;
        field.name = raw.name.clone();
        field.clone_of = raw.clone_of.clone();
        resolved[index] = Some(field);
    }

    // All slots are filled now; clones of clones were rejected above
    // because an unresolved sibling reads back as None.
    let mut fields: Vec<FieldDefinition> = resolved.into_iter().flatten().collect();
    debug_assert_eq!(fields.len(), object.fields.len());

    let object_id = objectid::object_id(
        &object.name,
        object.settings,
        object.single_instance,
        &fields,
    )?;

    fields.sort_by_key(|f| std::cmp::Reverse(f.field_type.wire_size()));

    Ok(Definition {
        name: object.name,
        description: object.description,
        single_instance: object.single_instance,
        settings: object.settings,
        category: object.category,
        object_id,
        access: object.access,
        telemetry_gcs: object.telemetry_gcs,
        telemetry_flight: object.telemetry_flight,
        logging: object.logging,
        meta_for: None,
        fields,
    })
}

fn resolve_field(object: &str, raw: &RawField) -> Result<FieldDefinition, SchemaError> {
    let field_type =
        FieldType::from_name(&raw.type_name).ok_or_else(|| SchemaError::UnknownType {
            object: object.to_string(),
            field: raw.name.clone(),
            field_type: raw.type_name.clone(),
        })?;

    let mut elements = raw.elements.max(1);
    let mut element_names = None;
    let names = if !raw.element_names_attr.is_empty() {
        split_list(&raw.element_names_attr)
    } else {
        raw.element_names.clone()
    };
    if !names.is_empty() {
        if raw.elements != 0 && raw.elements != names.len() {
            return Err(SchemaError::BadElementNames {
                object: object.to_string(),
                field: raw.name.clone(),
                elements: raw.elements,
                names: names.len(),
            });
        }
        elements = names.len();
        element_names = Some(names);
    }

    let options = if !raw.options_attr.is_empty() {
        split_list(&raw.options_attr)
    } else {
        raw.options.clone()
    };

    Ok(FieldDefinition {
        name: raw.name.clone(),
        field_type,
        units: raw.units.clone(),
        elements,
        element_names,
        options,
        default_value: raw.default_value.clone(),
        clone_of: String::new(),
    })
}

/// Split a CSV attribute after stripping whitespace and newlines.
fn split_list(value: &str) -> Vec<String> {
    let sanitized: String = value.chars().filter(|c| !matches!(c, '\n' | '\t')).collect();
    sanitized
        .split(',')
        .map(|part| part.trim_matches(' ').to_string())
        .collect()
}

/// Build the Meta companion for a primary definition: four fixed fields
/// controlling transmission cadence, living at `primary_id + 1`.
fn synthesize_meta(primary: &Definition) -> Definition {
    let field = |name: &str, field_type: FieldType, units: &str| FieldDefinition {
        name: name.to_string(),
        field_type,
        units: units.to_string(),
        elements: 1,
        element_names: None,
        options: Vec::new(),
        default_value: String::new(),
        clone_of: String::new(),
    };

    // Declared order is modes first; the wire sort packs the u16 periods
    // ahead of it.
    let mut fields = vec![
        field("modes", FieldType::UInt8, "boolean"),
        field("periodFlight", FieldType::UInt16, "ms"),
        field("periodGCS", FieldType::UInt16, "ms"),
        field("periodLog", FieldType::UInt16, "ms"),
    ];
    fields.sort_by_key(|f| std::cmp::Reverse(f.field_type.wire_size()));

    Definition {
        name: format!("{}Meta", primary.name),
        description: format!("Meta for: \n{}", primary.description),
        single_instance: true,
        settings: false,
        category: String::new(),
        object_id: primary.meta_id(),
        access: Default::default(),
        telemetry_gcs: Default::default(),
        telemetry_flight: Default::default(),
        logging: Default::default(),
        meta_for: Some(primary.object_id),
        fields,
    }
}
