use serde::{Deserialize, Serialize};

/// The storage type of one schema field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Float,
    /// Exact decimal, optionally rounded to a fixed number of places.
    Decimal {
        #[serde(default)]
        decimal_places: Option<u32>,
    },
    Boolean,
    /// Bounded or unbounded string.
    Text {
        #[serde(default)]
        max_length: Option<usize>,
    },
    Date,
    DateTime,
    Time,
    /// Reference to another entity type by primary key.
    Reference { target: String },
    /// Anything else; carried opaquely.
    Json,
}

/// One field of a live schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
}

impl FieldDescriptor {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        FieldDescriptor {
            name: name.to_string(),
            kind,
            nullable: false,
            unique: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// The referenced entity type, for reference fields.
    pub fn reference_target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Reference { target } => Some(target),
            _ => None,
        }
    }
}

/// Live schema of one entity type, as exposed by the Model Registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub entity_type: String,
    pub fields: Vec<FieldDescriptor>,
    /// Composite unique constraints, in priority order.
    #[serde(default)]
    pub unique_together: Vec<Vec<String>>,
}

impl SchemaDescriptor {
    pub fn new(entity_type: &str, fields: Vec<FieldDescriptor>) -> Self {
        SchemaDescriptor {
            entity_type: entity_type.to_string(),
            fields,
            unique_together: Vec::new(),
        }
    }

    pub fn with_unique_together(mut self, fields: &[&str]) -> Self {
        self.unique_together
            .push(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// App label half of the dotted entity type.
    pub fn app_label(&self) -> &str {
        self.entity_type
            .split_once('.')
            .map(|(app, _)| app)
            .unwrap_or(&self.entity_type)
    }

    /// Candidate natural keys in priority order: single-field unique
    /// constraints in declared field order, then `unique_together` tuples.
    pub fn unique_key_candidates(&self) -> Vec<Vec<String>> {
        let mut keys: Vec<Vec<String>> = self
            .fields
            .iter()
            .filter(|f| f.unique)
            .map(|f| vec![f.name.clone()])
            .collect();
        for tuple in &self.unique_together {
            if !tuple.is_empty() && !keys.contains(tuple) {
                keys.push(tuple.clone());
            }
        }
        keys
    }
}
