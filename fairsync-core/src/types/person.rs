//! People attached to a dataset, e.g. its authors.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

static ORCID_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-){3}\d{3}(\d|X)$").expect("valid ORCID regex")
});
static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\w\.+-]+@([\w-]+\.)+[\w-]{2,}$").expect("valid email regex")
});
static PEOPLE_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[;\n]").expect("valid regex"));

/// A semi-structured person record.
///
/// Unknown attributes (e.g. `affiliation`) are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Person {
    /// Parse a person identifier: an ORCID id, an e-mail address, or a full
    /// name, optionally written as `Surname, Name`.
    pub fn parse(person: &str) -> Person {
        let person = person.trim();
        if ORCID_ID.is_match(person) {
            return Person {
                orcid_id: Some(person.to_string()),
                ..Person::default()
            };
        }
        if EMAIL.is_match(person) {
            return Person {
                email: Some(person.to_string()),
                ..Person::default()
            };
        }

        let mut parsed = Person {
            fullname: Some(person.to_string()),
            ..Person::default()
        };
        let parts: Vec<&str> = person.split(',').map(str::trim).collect();
        if let [surname, name] = parts.as_slice() {
            parsed.surname = Some(surname.to_string());
            parsed.name = Some(name.to_string());
        }
        parsed
    }

    /// Build a person from a string or an attribute map.
    ///
    /// A given `fullname` is parsed first and explicit attributes win over
    /// what parsing yields.
    pub fn from_value(value: &Value) -> Result<Person> {
        match value {
            Value::String(s) => Ok(Person::parse(s)),
            Value::Object(map) => {
                let explicit: Person = serde_json::from_value(Value::Object(map.clone()))?;
                let mut person = match explicit.fullname.as_deref() {
                    Some(fullname) if !fullname.trim().is_empty() => Person::parse(fullname),
                    _ => Person::default(),
                };
                person.merge(explicit);
                Ok(person.normalized())
            }
            other => Err(Error::invalid_metadata(
                "authors",
                format!("cannot interpret {other} as a person"),
            )),
        }
    }

    fn merge(&mut self, other: Person) {
        let fields = [
            (&mut self.name, other.name),
            (&mut self.surname, other.surname),
            (&mut self.fullname, other.fullname),
            (&mut self.email, other.email),
            (&mut self.institution, other.institution),
            (&mut self.orcid_id, other.orcid_id),
        ];
        for (slot, value) in fields {
            if let Some(value) = non_empty(value) {
                *slot = Some(value);
            }
        }
        for (key, value) in other.extra {
            if !is_empty_value(&value) {
                self.extra.insert(key, value);
            }
        }
    }

    /// Drop empty attributes and derive `fullname` from name and surname.
    fn normalized(mut self) -> Person {
        self.name = non_empty(self.name.take());
        self.surname = non_empty(self.surname.take());
        self.fullname = non_empty(self.fullname.take());
        self.email = non_empty(self.email.take());
        self.institution = non_empty(self.institution.take());
        self.orcid_id = non_empty(self.orcid_id.take());
        if self.fullname.is_none() {
            if let (Some(name), Some(surname)) = (&self.name, &self.surname) {
                self.fullname = Some(format!("{name} {surname}").trim().to_string());
            }
        }
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Values the metadata model treats as absent. Booleans and numbers never are.
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// An ordered list of people.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonList(pub Vec<Person>);

impl PersonList {
    /// Coerce a value into people.
    ///
    /// Strings are split on `;` and newlines; list items may be strings or
    /// attribute maps; empty items are skipped.
    pub fn from_value(value: &Value) -> Result<PersonList> {
        let mut persons = Vec::new();
        match value {
            v if is_empty_value(v) => {}
            Value::String(s) => {
                for item in PEOPLE_SEPARATOR.split(s) {
                    if !item.trim().is_empty() {
                        persons.push(Person::parse(item));
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    if is_empty_value(item) {
                        continue;
                    }
                    persons.push(Person::from_value(item)?);
                }
            }
            Value::Object(_) => persons.push(Person::from_value(value)?),
            other => {
                return Err(Error::invalid_metadata(
                    "authors",
                    format!("cannot interpret {other} as a list of people"),
                ))
            }
        }
        Ok(PersonList(persons))
    }

    pub fn push(&mut self, person: Person) {
        self.0.push(person);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Person> {
        self.0.iter()
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.0.iter().map(Person::to_value).collect())
    }
}

impl From<&str> for Person {
    fn from(value: &str) -> Self {
        Person::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_surname_comma_name() {
        let person = Person::parse(" Doe, John ");
        assert_eq!(person.fullname.as_deref(), Some("Doe, John"));
        assert_eq!(person.surname.as_deref(), Some("Doe"));
        assert_eq!(person.name.as_deref(), Some("John"));
    }

    #[test]
    fn parse_orcid_and_email() {
        let orcid = Person::parse("0000-0002-1825-009X");
        assert_eq!(orcid.orcid_id.as_deref(), Some("0000-0002-1825-009X"));
        assert_eq!(orcid.fullname, None);

        let email = Person::parse("jane.doe+data@example.org");
        assert_eq!(email.email.as_deref(), Some("jane.doe+data@example.org"));
    }

    #[test]
    fn fullname_is_derived_from_parts() {
        let person = Person::from_value(&json!({"name": "Jane", "surname": "Doe"})).unwrap();
        assert_eq!(person.fullname.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn explicit_attributes_win_over_parsed_fullname() {
        let person = Person::from_value(&json!({
            "fullname": "Doe, Jane",
            "name": "J.",
            "affiliation": "TU Delft",
            "email": ""
        }))
        .unwrap();
        assert_eq!(person.name.as_deref(), Some("J."));
        assert_eq!(person.surname.as_deref(), Some("Doe"));
        assert_eq!(person.email, None);
        assert_eq!(person.extra.get("affiliation"), Some(&json!("TU Delft")));
    }

    #[test]
    fn list_from_string_and_items() {
        let list = PersonList::from_value(&json!("Doe, John; Roe, Jane\n\n")).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.0[1].surname.as_deref(), Some("Roe"));

        let list = PersonList::from_value(&json!(["Doe, John", {"fullname": "Jane Roe"}, ""])).unwrap();
        assert_eq!(list.len(), 2);
        assert!(PersonList::from_value(&json!(3)).is_err());
    }

    #[test]
    fn serialized_form_skips_missing_attributes() {
        let value = Person::parse("Doe, John").to_value();
        assert_eq!(
            value,
            json!({"name": "John", "surname": "Doe", "fullname": "Doe, John"})
        );
    }
}
