//! Declarative page fields.
use std::fmt;
use std::sync::Arc;

/// Name of the synthetic field carrying the error message on error pages.
pub const ERROR_INFO: &str = "ERRORINFO";

/// What a field renders as, and how the engine treats its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    InputText,
    InputPassword,
    InputHidden,
    InputCheckbox,
    InputRadio,
    /// Receives a completed file upload.
    InputFile,
    Select,
    TextArea,
    Submit,
    /// Carried as a cookie rather than a form control.
    Cookie,
}

/// Where the engine extracts the field's value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPosition {
    Url,
    Header,
    Cookie,
    Body,
    /// Accepted from any position.
    Any,
}

impl FieldPosition {
    pub(crate) fn accepts(self, given: FieldPosition) -> bool {
        self == FieldPosition::Any || self == given
    }
}

type Validator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Definition of one page field.
#[derive(Clone)]
pub struct FieldDef {
    name: String,
    role: FieldRole,
    position: FieldPosition,
    mandatory: bool,
    default: Option<String>,
    cookie_set: bool,
    rank: usize,
    validator: Option<Validator>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, role: FieldRole, position: FieldPosition) -> Self {
        Self {
            name: name.into(),
            role,
            position,
            mandatory: false,
            default: None,
            cookie_set: false,
            rank: 0,
            validator: None,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Export the field's value as a response cookie.
    pub fn cookie_set(mut self) -> Self {
        self.cookie_set = true;
        self
    }

    pub fn rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    pub fn validator(mut self, validator: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> FieldRole {
        self.role
    }

    pub fn position(&self) -> FieldPosition {
        self.position
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn default(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn is_cookie_set(&self) -> bool {
        self.cookie_set
    }

    pub fn get_rank(&self) -> usize {
        self.rank
    }

    pub(crate) fn validate(&self, value: &str) -> bool {
        match &self.validator {
            Some(validator) => validator(value),
            None => true,
        }
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("position", &self.position)
            .field("mandatory", &self.mandatory)
            .finish_non_exhaustive()
    }
}
