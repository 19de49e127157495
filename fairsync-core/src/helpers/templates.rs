//! Built-in metadata templates.
//!
//! A template is the `metadata:` section a freshly initialized dataset starts
//! with: the attribute names a repository expects, left blank for the user.

use serde_json::{Map, Value};

use crate::{Error, Result};

pub const DEFAULT_TEMPLATE: &str = "default";

const DEFAULT: &str = r#"
type: dataset
title:
description:
authors: []
keywords: []
license:
doi:
"#;

const FIGSHARE: &str = r#"
type: dataset
title:
description:
authors: []
keywords: []
categories: []
license:
funding:
references: []
doi:
"#;

const ZENODO: &str = r#"
type: dataset
title:
description:
authors: []
keywords: []
access_type: open
license:
embargo_date:
access_conditions:
notes:
related_identifiers: []
communities: []
doi:
"#;

const DJEHUTY: &str = r#"
type: dataset
title:
description:
authors: []
keywords: []
categories: []
license:
publisher:
language:
time_coverage:
geolocation:
funding:
doi:
"#;

const DATAVERSE: &str = r#"
title:
description:
authors: []
keywords: []
subject: []
license:
doi:
"#;

const INVENIO: &str = r#"
type: dataset
title:
description:
authors: []
keywords: []
license:
publisher:
publication_date:
doi:
"#;

const TEMPLATES: &[(&str, &str)] = &[
    ("dataverse", DATAVERSE),
    ("default", DEFAULT),
    ("djehuty", DJEHUTY),
    ("figshare", FIGSHARE),
    ("invenio", INVENIO),
    ("zenodo", ZENODO),
];

/// Names of the available templates.
pub fn names() -> impl Iterator<Item = &'static str> {
    TEMPLATES.iter().map(|(name, _)| *name)
}

pub fn exists(name: &str) -> bool {
    TEMPLATES.iter().any(|(n, _)| *n == name)
}

/// The metadata attributes of a template, blanks included.
pub fn load(name: &str) -> Result<Map<String, Value>> {
    let (_, text) = TEMPLATES
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| Error::InvalidTemplate(name.to_string()))?;
    let value: Value = serde_yaml::from_str(text)?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}
