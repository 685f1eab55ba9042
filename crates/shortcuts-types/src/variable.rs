use serde::{Deserialize, Serialize};

use crate::ids::VariableId;

/// How a variable obtains its value at execution time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    #[default]
    Constant,
    Text,
    Number,
    Password,
    Select,
    Toggle,
    Color,
    Date,
    Time,
    Slider,
}

/// A named placeholder referenced by key from shortcut configurations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub id: VariableId,
    pub key: String,
    pub value: String,
    pub variable_type: VariableType,
    pub title: String,
    pub url_encode: bool,
    pub json_encode: bool,
}

impl Variable {
    pub fn create_new(id: VariableId) -> Self {
        Self {
            id,
            key: String::new(),
            value: String::new(),
            variable_type: VariableType::default(),
            title: String::new(),
            url_encode: false,
            json_encode: false,
        }
    }

    pub fn detach(&self, id: VariableId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    pub fn is_same_as(&self, other: &Variable) -> bool {
        self.key == other.key
            && self.value == other.value
            && self.variable_type == other.variable_type
            && self.title == other.title
            && self.url_encode == other.url_encode
            && self.json_encode == other.json_encode
    }
}
