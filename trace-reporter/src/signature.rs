use std::borrow::Borrow;
use std::fmt;

use serde::Serialize;

use crate::error::Error;

/// Key under which traces of the same operation are grouped.
///
/// Rendered as `# <operation name>\n<query>` where tabs, carriage returns and
/// line feeds are removed from the query text. Variables play no part in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct QuerySignature(String);

impl QuerySignature {
    pub fn new(operation_name: &str, query: &str) -> Self {
        let query: String = query
            .chars()
            .filter(|c| !matches!(c, '\t' | '\n' | '\r'))
            .collect();
        Self(format!("# {operation_name}\n{query}"))
    }

    /// Accept a signature computed elsewhere.
    pub fn parse(signature: impl Into<String>) -> Result<Self, Error> {
        let signature = signature.into();
        if signature.is_empty() {
            return Err(Error::EmptySignature);
        }
        Ok(Self(signature))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for QuerySignature {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<QuerySignature> for String {
    fn from(signature: QuerySignature) -> Self {
        signature.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_name_prefixes_query() {
        let signature = QuerySignature::new("Foo", "query Foo { user { email } }");
        assert_eq!(signature.as_str(), "# Foo\nquery Foo { user { email } }");
    }

    #[test]
    fn control_whitespace_is_stripped() {
        let signature = QuerySignature::new("Foo", "query Foo {\n\tuser {\r\n\t\temail\n\t}\n}");
        assert_eq!(signature.as_str(), "# Foo\nquery Foo {user {email}}");
    }

    #[test]
    fn identical_inputs_give_identical_signatures() {
        assert_eq!(
            QuerySignature::new("HeroQuery", "query HeroQuery { hero { id } }"),
            QuerySignature::new("HeroQuery", "query HeroQuery { hero { id } }"),
        );
    }

    #[test]
    fn anonymous_operations_keep_the_prefix() {
        assert_eq!(QuerySignature::new("", "{ hero { id } }").as_str(), "# \n{ hero { id } }");
    }

    #[test]
    fn empty_signature_is_rejected() {
        assert!(matches!(
            QuerySignature::parse(""),
            Err(Error::EmptySignature)
        ));
        assert_eq!(QuerySignature::parse("# -\n{a}").unwrap().as_str(), "# -\n{a}");
    }
}
