use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Email,
    Url,
    Date,
    DateTime,
    Checkbox,
    Select,
    MultiSelect,
    Radio,
    File,
    Rating,
    Section,
}

impl FieldType {
    pub const ALL: [FieldType; 14] = [
        FieldType::Text,
        FieldType::Textarea,
        FieldType::Number,
        FieldType::Email,
        FieldType::Url,
        FieldType::Date,
        FieldType::DateTime,
        FieldType::Checkbox,
        FieldType::Select,
        FieldType::MultiSelect,
        FieldType::Radio,
        FieldType::File,
        FieldType::Rating,
        FieldType::Section,
    ];

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "text" => Ok(Self::Text),
            "textarea" => Ok(Self::Textarea),
            "number" => Ok(Self::Number),
            "email" => Ok(Self::Email),
            "url" => Ok(Self::Url),
            "date" => Ok(Self::Date),
            "datetime" => Ok(Self::DateTime),
            "checkbox" => Ok(Self::Checkbox),
            "select" => Ok(Self::Select),
            "multi_select" => Ok(Self::MultiSelect),
            "radio" => Ok(Self::Radio),
            "file" => Ok(Self::File),
            "rating" => Ok(Self::Rating),
            "section" => Ok(Self::Section),
            _ => Err(AppError::BadRequest(format!(
                "invalid field type '{value}'"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Textarea => "textarea",
            Self::Number => "number",
            Self::Email => "email",
            Self::Url => "url",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Checkbox => "checkbox",
            Self::Select => "select",
            Self::MultiSelect => "multi_select",
            Self::Radio => "radio",
            Self::File => "file",
            Self::Rating => "rating",
            Self::Section => "section",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Textarea => "Textarea",
            Self::Number => "Number",
            Self::Email => "Email",
            Self::Url => "URL",
            Self::Date => "Date",
            Self::DateTime => "DateTime",
            Self::Checkbox => "Checkbox",
            Self::Select => "Select",
            Self::MultiSelect => "Multi Select",
            Self::Radio => "Radio",
            Self::File => "File Upload",
            Self::Rating => "Rating",
            Self::Section => "Section Header",
        }
    }

    pub fn is_section(self) -> bool {
        self == Self::Section
    }

    pub fn needs_options(self) -> bool {
        matches!(self, Self::Select | Self::MultiSelect | Self::Radio)
    }

    fn value_key(self) -> Option<&'static str> {
        match self {
            Self::Text | Self::Textarea => Some("text"),
            Self::Number => Some("number"),
            Self::Email => Some("email"),
            Self::Url => Some("url"),
            Self::Date => Some("date"),
            Self::DateTime => Some("datetime"),
            Self::Checkbox => Some("checked"),
            Self::Select | Self::Radio => Some("selected"),
            Self::MultiSelect => Some("selections"),
            Self::File => Some("file_id"),
            Self::Rating => Some("rating"),
            Self::Section => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub label: String,
    pub field_type: FieldType,
    pub is_required: bool,
    pub options: Vec<FieldOption>,
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
}

impl FieldDefinition {
    pub fn validate(&self) -> AppResult<()> {
        let label = self.label.trim();
        if label.is_empty() {
            return Err(AppError::BadRequest(
                "field label cannot be empty".to_string(),
            ));
        }

        if self.field_type.is_section() && self.is_required {
            return Err(AppError::BadRequest(format!(
                "field '{label}' is a section header and cannot be required"
            )));
        }

        if self.field_type.needs_options() {
            if self.options.is_empty() {
                return Err(AppError::BadRequest(format!(
                    "field '{label}' requires at least one option"
                )));
            }

            for option in &self.options {
                if option.value.trim().is_empty() {
                    return Err(AppError::BadRequest(format!(
                        "field '{label}' options must have a non-empty value"
                    )));
                }
                if option.label.trim().is_empty() {
                    return Err(AppError::BadRequest(format!(
                        "field '{label}' options must have a non-empty label"
                    )));
                }
            }
        }

        if let Some(min_length) = self.min_length {
            if min_length < 0 {
                return Err(AppError::BadRequest(format!(
                    "field '{label}' min_length cannot be negative"
                )));
            }
        }

        if let Some(max_length) = self.max_length {
            if max_length < 0 {
                return Err(AppError::BadRequest(format!(
                    "field '{label}' max_length cannot be negative"
                )));
            }
        }

        if let (Some(min_length), Some(max_length)) = (self.min_length, self.max_length) {
            if min_length > max_length {
                return Err(AppError::BadRequest(format!(
                    "field '{label}' min_length cannot be greater than max_length"
                )));
            }
        }

        if let (Some(min_value), Some(max_value)) = (self.min_value, self.max_value) {
            if min_value > max_value {
                return Err(AppError::BadRequest(format!(
                    "field '{label}' min_value cannot be greater than max_value"
                )));
            }
        }

        Ok(())
    }

    pub fn parse_value(&self, raw: &Value) -> AppResult<FieldValue> {
        let label = self.label.trim();

        let Some(key) = self.field_type.value_key() else {
            return Err(AppError::BadRequest(format!(
                "field '{label}' is a section header and does not accept a value"
            )));
        };

        let Some(object) = raw.as_object() else {
            return Err(AppError::BadRequest(format!(
                "field '{label}' value must be a JSON object"
            )));
        };

        if object.is_empty() {
            return Ok(FieldValue::Empty);
        }

        if object.len() != 1 || !object.contains_key(key) {
            return Err(AppError::BadRequest(format!(
                "field '{label}' value must contain exactly the \"{key}\" key for {} fields",
                self.field_type.as_str()
            )));
        }

        let payload = &object[key];
        match self.field_type {
            FieldType::Text | FieldType::Textarea => {
                Ok(FieldValue::Text(expect_string(label, key, payload)?))
            }
            FieldType::Number => Ok(FieldValue::Number(expect_number(label, key, payload)?)),
            FieldType::Email => Ok(FieldValue::Email(expect_string(label, key, payload)?)),
            FieldType::Url => Ok(FieldValue::Url(expect_string(label, key, payload)?)),
            FieldType::Date => {
                let text = expect_string(label, key, payload)?;
                let date = NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|_| {
                    AppError::BadRequest(format!("field '{label}' must be a YYYY-MM-DD date"))
                })?;
                Ok(FieldValue::Date(date))
            }
            FieldType::DateTime => {
                let text = expect_string(label, key, payload)?;
                let datetime = DateTime::parse_from_rfc3339(&text).map_err(|_| {
                    AppError::BadRequest(format!(
                        "field '{label}' must be an RFC 3339 datetime"
                    ))
                })?;
                Ok(FieldValue::DateTime(datetime))
            }
            FieldType::Checkbox => {
                let checked = payload.as_bool().ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "field '{label}' \"{key}\" must be a boolean"
                    ))
                })?;
                Ok(FieldValue::Checkbox(checked))
            }
            FieldType::Select | FieldType::Radio => {
                Ok(FieldValue::Selected(expect_string(label, key, payload)?))
            }
            FieldType::MultiSelect => {
                let items = payload.as_array().ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "field '{label}' \"{key}\" must be an array of strings"
                    ))
                })?;

                let mut selections = Vec::with_capacity(items.len());
                for item in items {
                    let selection = item.as_str().ok_or_else(|| {
                        AppError::BadRequest(format!(
                            "field '{label}' \"{key}\" must be an array of strings"
                        ))
                    })?;
                    selections.push(selection.to_string());
                }
                Ok(FieldValue::Selections(selections))
            }
            FieldType::File => Ok(FieldValue::FileRef(expect_string(label, key, payload)?)),
            FieldType::Rating => Ok(FieldValue::Rating(expect_number(label, key, payload)?)),
            FieldType::Section => unreachable!("section fields have no value key"),
        }
    }

    pub fn validate_complete(&self, value: &FieldValue) -> AppResult<()> {
        let label = self.label.trim();

        if self.is_required && value.is_empty() {
            return Err(AppError::BadRequest(format!("field '{label}' is required")));
        }

        match value {
            FieldValue::Text(text) => self.check_length(label, text)?,
            FieldValue::Email(email) => {
                self.check_length(label, email)?;
                if !email_pattern().is_match(email.trim()) {
                    return Err(AppError::BadRequest(format!(
                        "field '{label}' must be a valid email address"
                    )));
                }
            }
            FieldValue::Url(value) => {
                self.check_length(label, value)?;
                let parsed = url::Url::parse(value.trim()).map_err(|_| {
                    AppError::BadRequest(format!("field '{label}' must be a valid URL"))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(AppError::BadRequest(format!(
                        "field '{label}' must use http or https"
                    )));
                }
            }
            FieldValue::Number(number) | FieldValue::Rating(number) => {
                self.check_bounds(label, *number)?;
            }
            FieldValue::Selected(selected) => {
                if !self.has_option(selected) {
                    return Err(AppError::BadRequest(format!(
                        "field '{label}' has no option '{selected}'"
                    )));
                }
            }
            FieldValue::Selections(selections) => {
                for selection in selections {
                    if !self.has_option(selection) {
                        return Err(AppError::BadRequest(format!(
                            "field '{label}' has no option '{selection}'"
                        )));
                    }
                }
            }
            FieldValue::Empty
            | FieldValue::Date(_)
            | FieldValue::DateTime(_)
            | FieldValue::Checkbox(_)
            | FieldValue::FileRef(_) => {}
        }

        Ok(())
    }

    fn has_option(&self, value: &str) -> bool {
        self.options.iter().any(|option| option.value == value)
    }

    fn check_length(&self, label: &str, text: &str) -> AppResult<()> {
        let length = text.chars().count() as i64;

        if let Some(min_length) = self.min_length {
            if length < min_length {
                return Err(AppError::BadRequest(format!(
                    "field '{label}' must be at least {min_length} characters"
                )));
            }
        }

        if let Some(max_length) = self.max_length {
            if length > max_length {
                return Err(AppError::BadRequest(format!(
                    "field '{label}' must be at most {max_length} characters"
                )));
            }
        }

        Ok(())
    }

    fn check_bounds(&self, label: &str, number: f64) -> AppResult<()> {
        if let Some(min_value) = self.min_value {
            if number < min_value {
                return Err(AppError::BadRequest(format!(
                    "field '{label}' must be at least {min_value}"
                )));
            }
        }

        if let Some(max_value) = self.max_value {
            if number > max_value {
                return Err(AppError::BadRequest(format!(
                    "field '{label}' must be at most {max_value}"
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Empty,
    Text(String),
    Number(f64),
    Email(String),
    Url(String),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Checkbox(bool),
    Selected(String),
    Selections(Vec<String>),
    FileRef(String),
    Rating(f64),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) | Self::Email(text) | Self::Url(text) | Self::FileRef(text) => {
                text.trim().is_empty()
            }
            Self::Selected(selected) => selected.trim().is_empty(),
            Self::Selections(selections) => selections.is_empty(),
            Self::Number(_)
            | Self::Date(_)
            | Self::DateTime(_)
            | Self::Checkbox(_)
            | Self::Rating(_) => false,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Empty => Value::Object(Map::new()),
            Self::Text(text) => json!({ "text": text }),
            Self::Number(number) => json!({ "number": number }),
            Self::Email(email) => json!({ "email": email }),
            Self::Url(value) => json!({ "url": value }),
            Self::Date(date) => json!({ "date": date.format("%Y-%m-%d").to_string() }),
            Self::DateTime(datetime) => json!({ "datetime": datetime.to_rfc3339() }),
            Self::Checkbox(checked) => json!({ "checked": checked }),
            Self::Selected(selected) => json!({ "selected": selected }),
            Self::Selections(selections) => json!({ "selections": selections }),
            Self::FileRef(file_id) => json!({ "file_id": file_id }),
            Self::Rating(rating) => json!({ "rating": rating }),
        }
    }
}

pub fn parse_options_json(raw: &str) -> AppResult<Vec<FieldOption>> {
    serde_json::from_str::<Vec<FieldOption>>(raw).map_err(|error| {
        tracing::error!(error = ?error, raw, "failed to parse stored field options");
        AppError::Internal
    })
}

fn expect_string(label: &str, key: &str, payload: &Value) -> AppResult<String> {
    payload
        .as_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::BadRequest(format!("field '{label}' \"{key}\" must be a string")))
}

fn expect_number(label: &str, key: &str, payload: &Value) -> AppResult<f64> {
    payload
        .as_f64()
        .ok_or_else(|| AppError::BadRequest(format!("field '{label}' \"{key}\" must be a number")))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern should compile")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(field_type: FieldType) -> FieldDefinition {
        FieldDefinition {
            label: "Sample".to_string(),
            field_type,
            is_required: false,
            options: Vec::new(),
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
        }
    }

    fn select_definition(values: &[&str]) -> FieldDefinition {
        let mut def = definition(FieldType::Select);
        def.options = values
            .iter()
            .map(|value| FieldOption {
                value: value.to_string(),
                label: value.to_string(),
            })
            .collect();
        def
    }

    #[test]
    fn field_type_parse_round_trips_all_variants() {
        for field_type in FieldType::ALL {
            let parsed =
                FieldType::parse(field_type.as_str()).expect("known field type should parse");
            assert_eq!(parsed, field_type);
        }

        assert!(FieldType::parse("dropdown").is_err());
    }

    #[test]
    fn select_without_options_fails_validation() {
        let mut def = definition(FieldType::Select);
        assert!(def.validate().is_err());

        def.options.push(FieldOption {
            value: "a".to_string(),
            label: "A".to_string(),
        });
        assert!(def.validate().is_ok());
    }

    #[test]
    fn option_entries_need_value_and_label() {
        let mut def = select_definition(&["a"]);
        def.options[0].label = "  ".to_string();
        assert!(def.validate().is_err());

        let mut def = select_definition(&["a"]);
        def.options[0].value = String::new();
        assert!(def.validate().is_err());
    }

    #[test]
    fn section_fields_cannot_be_required() {
        let mut def = definition(FieldType::Section);
        def.is_required = true;
        assert!(def.validate().is_err());
    }

    #[test]
    fn inverted_bounds_fail_validation() {
        let mut def = definition(FieldType::Number);
        def.min_value = Some(10.0);
        def.max_value = Some(1.0);
        assert!(def.validate().is_err());

        let mut def = definition(FieldType::Text);
        def.min_length = Some(20);
        def.max_length = Some(5);
        assert!(def.validate().is_err());
    }

    #[test]
    fn parse_value_requires_json_object() {
        let def = definition(FieldType::Text);
        assert!(def.parse_value(&json!("plain string")).is_err());
        assert!(def.parse_value(&json!(null)).is_err());
        assert!(def.parse_value(&json!([1, 2])).is_err());
    }

    #[test]
    fn parse_value_empty_object_is_empty() {
        let def = definition(FieldType::Number);
        let value = def.parse_value(&json!({})).expect("empty object should parse");
        assert_eq!(value, FieldValue::Empty);
        assert!(value.is_empty());
    }

    #[test]
    fn parse_value_rejects_wrong_or_extra_keys() {
        let def = definition(FieldType::Number);
        assert!(def.parse_value(&json!({ "text": "5" })).is_err());
        assert!(def
            .parse_value(&json!({ "number": 5, "note": "x" }))
            .is_err());
        assert!(def.parse_value(&json!({ "number": "five" })).is_err());
    }

    #[test]
    fn parse_value_rejects_section_values() {
        let def = definition(FieldType::Section);
        assert!(def.parse_value(&json!({})).is_err());
    }

    #[test]
    fn parse_value_enforces_date_grammar() {
        let def = definition(FieldType::Date);
        assert!(def.parse_value(&json!({ "date": "2025-13-40" })).is_err());
        assert!(def.parse_value(&json!({ "date": "13/01/2025" })).is_err());

        let value = def
            .parse_value(&json!({ "date": "2025-01-31" }))
            .expect("valid date should parse");
        assert_eq!(value.to_json(), json!({ "date": "2025-01-31" }));
    }

    #[test]
    fn parse_value_enforces_datetime_grammar() {
        let def = definition(FieldType::DateTime);
        assert!(def
            .parse_value(&json!({ "datetime": "2025-01-31 10:00" }))
            .is_err());
        assert!(def
            .parse_value(&json!({ "datetime": "2025-01-31T10:00:00Z" }))
            .is_ok());
    }

    #[test]
    fn required_empty_value_fails_completion() {
        let mut def = definition(FieldType::Text);
        def.is_required = true;

        assert!(def.validate_complete(&FieldValue::Empty).is_err());
        assert!(def
            .validate_complete(&FieldValue::Text("   ".to_string()))
            .is_err());
        assert!(def
            .validate_complete(&FieldValue::Text("done".to_string()))
            .is_ok());
    }

    #[test]
    fn required_checkbox_accepts_explicit_false() {
        let mut def = definition(FieldType::Checkbox);
        def.is_required = true;
        assert!(def.validate_complete(&FieldValue::Checkbox(false)).is_ok());
    }

    #[test]
    fn email_grammar_checked_on_completion() {
        let def = definition(FieldType::Email);
        assert!(def
            .validate_complete(&FieldValue::Email("not-an-email".to_string()))
            .is_err());
        assert!(def
            .validate_complete(&FieldValue::Email("audit@example.com".to_string()))
            .is_ok());
    }

    #[test]
    fn url_grammar_checked_on_completion() {
        let def = definition(FieldType::Url);
        assert!(def
            .validate_complete(&FieldValue::Url("example dot com".to_string()))
            .is_err());
        assert!(def
            .validate_complete(&FieldValue::Url("ftp://example.com/x".to_string()))
            .is_err());
        assert!(def
            .validate_complete(&FieldValue::Url("https://example.com/x".to_string()))
            .is_ok());
    }

    #[test]
    fn numeric_bounds_checked_on_completion() {
        let mut def = definition(FieldType::Rating);
        def.min_value = Some(1.0);
        def.max_value = Some(5.0);

        assert!(def.validate_complete(&FieldValue::Rating(0.0)).is_err());
        assert!(def.validate_complete(&FieldValue::Rating(6.0)).is_err());
        assert!(def.validate_complete(&FieldValue::Rating(3.0)).is_ok());
    }

    #[test]
    fn length_bounds_checked_on_completion() {
        let mut def = definition(FieldType::Text);
        def.min_length = Some(3);
        def.max_length = Some(5);

        assert!(def
            .validate_complete(&FieldValue::Text("ab".to_string()))
            .is_err());
        assert!(def
            .validate_complete(&FieldValue::Text("abcdef".to_string()))
            .is_err());
        assert!(def
            .validate_complete(&FieldValue::Text("abcd".to_string()))
            .is_ok());
    }

    #[test]
    fn selected_value_must_be_a_known_option() {
        let def = select_definition(&["FIFO", "LIFO"]);
        assert!(def
            .validate_complete(&FieldValue::Selected("HIFO".to_string()))
            .is_err());
        assert!(def
            .validate_complete(&FieldValue::Selected("FIFO".to_string()))
            .is_ok());
    }

    #[test]
    fn selections_must_all_be_known_options() {
        let mut def = select_definition(&["a", "b"]);
        def.field_type = FieldType::MultiSelect;

        assert!(def
            .validate_complete(&FieldValue::Selections(vec![
                "a".to_string(),
                "c".to_string()
            ]))
            .is_err());
        assert!(def
            .validate_complete(&FieldValue::Selections(vec![
                "a".to_string(),
                "b".to_string()
            ]))
            .is_ok());
    }

    #[test]
    fn required_multi_select_rejects_empty_selection() {
        let mut def = select_definition(&["a"]);
        def.field_type = FieldType::MultiSelect;
        def.is_required = true;

        assert!(def
            .validate_complete(&FieldValue::Selections(Vec::new()))
            .is_err());
    }

    #[test]
    fn to_json_produces_canonical_shapes() {
        assert_eq!(FieldValue::Empty.to_json(), json!({}));
        assert_eq!(
            FieldValue::Checkbox(true).to_json(),
            json!({ "checked": true })
        );
        assert_eq!(
            FieldValue::Selections(vec!["a".to_string()]).to_json(),
            json!({ "selections": ["a"] })
        );
        assert_eq!(
            FieldValue::FileRef("f-123".to_string()).to_json(),
            json!({ "file_id": "f-123" })
        );
    }

    #[test]
    fn parse_options_json_reads_stored_pairs() {
        let options = parse_options_json(r#"[{"value":"a","label":"A"}]"#)
            .expect("stored options should parse");
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].value, "a");

        assert!(parse_options_json("not json").is_err());
    }
}
