use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TupleParseError {
    #[error("missing '@' between relation and subject in '{0}'")]
    MissingSubject(String),

    #[error("missing '#' between object and relation in '{0}'")]
    MissingRelation(String),

    #[error("invalid object reference '{0}', expected type:id")]
    InvalidObject(String),

    #[error("invalid subject reference '{0}', expected type:id or type:id#relation")]
    InvalidSubject(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

impl FromStr for ObjectRef {
    type Err = TupleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        split_type_and_id(s)
            .map(|(object_type, object_id)| Self::new(object_type, object_id))
            .ok_or_else(|| TupleParseError::InvalidObject(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubjectRef {
    pub subject_type: String,
    pub subject_id: String,
    pub subject_relation: Option<String>,
}

impl SubjectRef {
    pub fn direct(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            subject_relation: None,
        }
    }

    pub fn userset(
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            subject_relation: Some(relation.into()),
        }
    }

    pub fn is_userset(&self) -> bool {
        self.subject_relation.is_some()
    }

    /// The `type:id` half of the subject, as an object reference.
    pub fn as_object(&self) -> ObjectRef {
        ObjectRef::new(&self.subject_type, &self.subject_id)
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.subject_id)?;
        if let Some(ref rel) = self.subject_relation {
            write!(f, "#{rel}")?;
        }
        Ok(())
    }
}

impl FromStr for SubjectRef {
    type Err = TupleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TupleParseError::InvalidSubject(s.to_string());
        let (reference, relation) = match s.split_once('#') {
            Some((reference, relation)) if !relation.is_empty() => (reference, Some(relation)),
            Some(_) => return Err(invalid()),
            None => (s, None),
        };
        let (subject_type, subject_id) = split_type_and_id(reference).ok_or_else(invalid)?;
        Ok(match relation {
            Some(relation) => Self::userset(subject_type, subject_id, relation),
            None => Self::direct(subject_type, subject_id),
        })
    }
}

fn split_type_and_id(s: &str) -> Option<(&str, &str)> {
    let (kind, id) = s.split_once(':')?;
    if kind.is_empty() || id.is_empty() || id.contains([':', '#', '@']) {
        return None;
    }
    Some((kind, id))
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tuple {
    pub object: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl Tuple {
    pub fn new(object: ObjectRef, relation: impl Into<String>, subject: SubjectRef) -> Self {
        Self {
            object,
            relation: relation.into(),
            subject,
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

/// Parses the text form `type:id#relation@type:id[#relation]`.
impl FromStr for Tuple {
    type Err = TupleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (resource, subject) = s
            .split_once('@')
            .ok_or_else(|| TupleParseError::MissingSubject(s.to_string()))?;
        let (object, relation) = resource
            .split_once('#')
            .filter(|(_, relation)| !relation.is_empty())
            .ok_or_else(|| TupleParseError::MissingRelation(s.to_string()))?;

        Ok(Self::new(object.parse()?, relation, subject.parse()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleWrite {
    pub object: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl TupleWrite {
    pub fn new(object: ObjectRef, relation: impl Into<String>, subject: SubjectRef) -> Self {
        Self {
            object,
            relation: relation.into(),
            subject,
        }
    }
}

impl From<TupleWrite> for Tuple {
    fn from(write: TupleWrite) -> Self {
        Self {
            object: write.object,
            relation: write.relation,
            subject: write.subject,
        }
    }
}

impl From<Tuple> for TupleWrite {
    fn from(tuple: Tuple) -> Self {
        Self {
            object: tuple.object,
            relation: tuple.relation,
            subject: tuple.subject,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub object_type: Option<String>,
    pub object_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<Option<String>>,
}

impl TupleFilter {
    /// Tuples stored on `relation` of one object.
    pub fn for_object(object: &ObjectRef, relation: &str) -> Self {
        Self {
            object_type: Some(object.object_type.clone()),
            object_id: Some(object.object_id.clone()),
            relation: Some(relation.to_string()),
            ..Default::default()
        }
    }

    /// Tuples whose subject is exactly `subject`.
    pub fn for_subject(subject: &SubjectRef) -> Self {
        Self {
            subject_type: Some(subject.subject_type.clone()),
            subject_id: Some(subject.subject_id.clone()),
            subject_relation: Some(subject.subject_relation.clone()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, tuple: &Tuple) -> bool {
        let (object, subject) = (&tuple.object, &tuple.subject);
        field_matches(&self.object_type, &object.object_type)
            && field_matches(&self.object_id, &object.object_id)
            && field_matches(&self.relation, &tuple.relation)
            && field_matches(&self.subject_type, &subject.subject_type)
            && field_matches(&self.subject_id, &subject.subject_id)
            && field_matches(&self.subject_relation, &subject.subject_relation)
    }
}

fn field_matches<T: PartialEq>(wanted: &Option<T>, actual: &T) -> bool {
    wanted.as_ref().is_none_or(|wanted| wanted == actual)

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotToken(u64);

impl SnapshotToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque position inside a paginated tuple read. Only the store that
/// issued it knows how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TuplePage {
    pub tuples: Vec<Tuple>,
    pub next: Option<ContinuationToken>,
}

impl TuplePage {
    pub fn last(tuples: Vec<Tuple>) -> Self {
        Self { tuples, next: None }
    }
}
