//! Identifier classification (the step between parsing and resolution).
//!
//! Every name node in a formula is tagged with what it *is* — reserved
//! token, entity id, variable, cross-sensor reference — using host
//! knowledge the parser does not have: the permitted entity domains, the
//! variables in scope, and the registry of sensor unique_ids. Classification
//! is pure; resolution of the tagged name to a value happens later in the
//! resolver chain.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use synsor_parse::NameView;

/// The reserved token that names the sensor's own value inside formulas.
pub const STATE_TOKEN: &str = "state";

/// Words the classifier never treats as user variables. Function names are
/// reserved too, but those arrive as call nodes and are checked against the
/// registry instead.
static RESERVED_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["and", "or", "not", "if", "else", "True", "False", "None", STATE_TOKEN]
        .into_iter()
        .collect()
});

pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS.contains(name) || crate::function_registry::get(name).is_some()
}

/// What an identifier turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// The `state` token.
    State,
    /// A reserved word or builtin function name used as a bare identifier.
    Reserved(String),
    /// `domain.object`, plus any attribute-access chain after it.
    Entity {
        entity_id: String,
        attribute_path: Vec<String>,
    },
    /// A variable in scope, plus any attribute-access chain after it.
    Variable {
        name: String,
        attribute_path: Vec<String>,
    },
    /// Another sensor's unique_id.
    CrossSensor { sensor_id: String },
    /// Nothing claimed this name at classify time; resolution decides.
    Unresolved { original: String },
}

/// Classification inputs for one formula scope.
///
/// `domains` must be non-empty — without the host's domain list there is no
/// way to tell `sensor.foo` (an entity) from a variable named `sensor` with
/// an attribute access, and guessing corrupts dependency extraction. The
/// engine enforces this before any classifier is built.
pub struct Classifier<'a> {
    domains: &'a HashSet<String>,
    variables_in_scope: &'a dyn Fn(&str) -> bool,
    sensor_ids: &'a HashSet<String>,
}

impl<'a> Classifier<'a> {
    pub fn new(
        domains: &'a HashSet<String>,
        variables_in_scope: &'a dyn Fn(&str) -> bool,
        sensor_ids: &'a HashSet<String>,
    ) -> Self {
        debug_assert!(!domains.is_empty(), "classifier requires a domain list");
        Self {
            domains,
            variables_in_scope,
            sensor_ids,
        }
    }

    /// Classify one name. Rules apply in priority order; the earliest match
    /// wins.
    pub fn classify(&self, name: NameView<'_>) -> Classified {
        let first = name.first();

        // 1. Reserved words shadow everything.
        if !name.is_dotted() {
            if first == STATE_TOKEN {
                return Classified::State;
            }
            if is_reserved_word(first) {
                return Classified::Reserved(first.to_string());
            }
        }

        // 2. A dotted name whose first segment is a known domain is an
        //    entity id; segments past the second are attribute access.
        if name.is_dotted() && self.domains.contains(first) {
            let entity_id = format!("{}.{}", name.parts[0], name.parts[1]);
            return Classified::Entity {
                entity_id,
                attribute_path: name.parts[2..].to_vec(),
            };
        }

        // 3./4. Variables in scope, with or without an attribute chain.
        if (self.variables_in_scope)(first) {
            return Classified::Variable {
                name: first.to_string(),
                attribute_path: name.parts[1..].to_vec(),
            };
        }

        // 5. Another sensor's unique_id.
        if !name.is_dotted() && self.sensor_ids.contains(first) {
            return Classified::CrossSensor {
                sensor_id: first.to_string(),
            };
        }

        // 6. Deferred to resolution.
        Classified::Unresolved {
            original: name.original.to_string(),
        }
    }
}
