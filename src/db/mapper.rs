//! Naming conventions between in-memory field names and storage column names.
//!
//! Three conventions are supported, selected by the `mapper` configuration key:
//! - `Same` keeps names unchanged.
//! - `Snake` splits before every upper-case letter (`UserName` <-> `user_name`).
//! - `Gonic` behaves like `Snake` but keeps common initialisms together
//!   (`UserID` <-> `user_id`, `HTTPServer` <-> `http_server`).

use serde::Serialize;

/// Initialisms kept upper-case by the gonic convention.
const COMMON_INITIALISMS: &[&str] = &[
    "ACL", "API", "ASCII", "CPU", "CSS", "DNS", "EOF", "GUID", "HTML", "HTTP", "HTTPS", "ID",
    "IP", "JSON", "LHS", "QPS", "RAM", "RHS", "RPC", "SLA", "SMTP", "SQL", "SSH", "TCP", "TLS",
    "TTL", "UDP", "UI", "UID", "UUID", "URI", "URL", "UTF8", "VM", "XML", "XMPP", "XSRF", "XSS",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingConvention {
    #[default]
    Same,
    Snake,
    Gonic,
}

impl NamingConvention {
    /// Select a convention by its configuration name.
    ///
    /// Matching is exact; callers lower-case the selector first. Unknown names map to
    /// `Same`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "snake" => Self::Snake,
            "gonic" => Self::Gonic,
            _ => Self::Same,
        }
    }

    /// Translate a field or type name into a column or table name.
    pub fn obj_to_table(&self, name: &str) -> String {
        match self {
            Self::Same => name.to_string(),
            Self::Snake => snake_cased(name),
            Self::Gonic => gonic_cased(name),
        }
    }

    /// Translate a column or table name into a field or type name.
    pub fn table_to_obj(&self, name: &str) -> String {
        match self {
            Self::Same => name.to_string(),
            Self::Snake => title_cased(name),
            Self::Gonic => gonic_title_cased(name),
        }
    }
}

impl std::fmt::Display for NamingConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Same => write!(f, "same"),
            Self::Snake => write!(f, "snake"),
            Self::Gonic => write!(f, "gonic"),
        }
    }
}

fn snake_cased(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn title_cased(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn gonic_cased(name: &str) -> String {
    let mut out: Vec<char> = Vec::with_capacity(name.len() + 4);
    for (idx, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() && idx > 0 {
            if out.last().is_some_and(|p| !p.is_ascii_uppercase()) {
                out.push('_');
            }
        }
        // End of an initialism run: "HTTPServer" splits before the 'S'.
        if !c.is_ascii_uppercase() && idx > 1 {
            let l = out.len();
            if l >= 2 && out[l - 1].is_ascii_uppercase() && out[l - 2].is_ascii_uppercase() {
                let last = out[l - 1];
                out[l - 1] = '_';
                out.push(last);
            }
        }
        out.push(c);
    }
    out.into_iter().collect::<String>().to_lowercase()
}

fn gonic_title_cased(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let upper = word.to_ascii_uppercase();
            if COMMON_INITIALISMS.contains(&upper.as_str()) {
                return upper;
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
