use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One selected value within a dimension.
///
/// `Absent` selects documents that carry no value at all in the dimension,
/// which can only be answered through a presence-tracking field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selection {
    Present(String),
    Absent,
}

impl Selection {
    pub fn present(value: impl Into<String>) -> Self {
        Selection::Present(value.into())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Selection::Absent)
    }

    pub fn as_value(&self) -> Option<&str> {
        match self {
            Selection::Present(value) => Some(value),
            Selection::Absent => None,
        }
    }
}

impl From<&str> for Selection {
    fn from(value: &str) -> Self {
        Selection::Present(value.to_string())
    }
}

impl From<String> for Selection {
    fn from(value: String) -> Self {
        Selection::Present(value)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Present(value) => f.write_str(value),
            Selection::Absent => f.write_str("<absent>"),
        }
    }
}

/// How multiple selections within one dimension combine.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Conjunction {
    /// A document matches if it carries at least one selected value.
    Any,
    /// A document matches only if it carries every selected value.
    #[default]
    All,
}

/// The selections made in a single dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermConjunction {
    terms: Vec<Selection>,
    mode: Conjunction,
    presence_field: Option<String>,
}

impl TermConjunction {
    /// Validates and builds a conjunction.
    ///
    /// Fails when `terms` is empty, when a present value is empty, when
    /// `presence_field` is given but empty, or when an [`Selection::Absent`]
    /// entry is used without a presence field.
    pub fn new(
        terms: Vec<Selection>,
        mode: Conjunction,
        presence_field: Option<String>,
    ) -> Result<Self> {
        if terms.is_empty() {
            return Err(Error::Config(
                "a term conjunction needs at least one term".into(),
            ));
        }
        if terms
            .iter()
            .any(|term| matches!(term, Selection::Present(v) if v.is_empty()))
        {
            return Err(Error::Config("term values must not be empty".into()));
        }
        if presence_field.as_deref() == Some("") {
            return Err(Error::Config(
                "presence field name must not be empty".into(),
            ));
        }
        if presence_field.is_none() && terms.iter().any(Selection::is_absent) {
            return Err(Error::Config(
                "an absent selection requires a presence field".into(),
            ));
        }

        Ok(Self {
            terms,
            mode,
            presence_field,
        })
    }

    /// A single selection. ANY and ALL are equivalent here.
    pub fn single(
        selection: Selection,
        presence_field: Option<String>,
    ) -> Result<Self> {
        Self::new(vec![selection], Conjunction::All, presence_field)
    }

    /// Matches documents carrying at least one of `values`.
    pub fn any<I, S>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            values.into_iter().map(|v| Selection::Present(v.into())).collect(),
            Conjunction::Any,
            None,
        )
    }

    /// Matches documents carrying every one of `values`.
    pub fn all<I, S>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            values.into_iter().map(|v| Selection::Present(v.into())).collect(),
            Conjunction::All,
            None,
        )
    }

    pub fn terms(&self) -> &[Selection] {
        &self.terms
    }

    pub fn mode(&self) -> Conjunction {
        self.mode
    }

    pub fn presence_field(&self) -> Option<&str> {
        self.presence_field.as_deref()
    }

    pub fn has_absent(&self) -> bool {
        self.terms.iter().any(Selection::is_absent)
    }

    /// Whether evaluation should take the OR path. A single term always
    /// uses the AND path, which matches the same documents.
    pub(crate) fn uses_any(&self) -> bool {
        self.terms.len() > 1 && self.mode == Conjunction::Any
    }
}
